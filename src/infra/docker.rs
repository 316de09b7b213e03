//! 容器运行时
//!
//! 通过 `docker` 命令行操作镜像和容器

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use super::command::{CommandError, CommandRunner};
use crate::domain::container::ContainerConfiguration;

/// docker 命令超时
const DOCKER_TIMEOUT: Duration = Duration::from_secs(120);

/// 容器运行时错误
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Docker image '{0}' not available. Please use docker pull to download this image")]
    ImageNotAvailable(String),

    #[error("TeamCity Server container '{0}' is not running")]
    ServerNotRunning(String),

    #[error("Failed to get IP address for container: {0}")]
    NoIpAddress(String),

    #[error("Docker command '{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// 容器运行时抽象
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_available(&self, image: &str) -> Result<bool, ContainerError>;

    async fn container_available(&self, container: &str) -> Result<bool, ContainerError>;

    async fn container_running(&self, container: &str) -> Result<bool, ContainerError>;

    /// 创建容器并返回其 ID
    async fn create_container(&self, configuration: &ContainerConfiguration) -> Result<String, ContainerError>;

    /// 启动容器，已运行时不报错
    async fn start_container(&self, container: &str) -> Result<(), ContainerError>;

    /// 停止容器，已停止时不报错
    async fn stop_container(&self, container: &str) -> Result<(), ContainerError>;

    async fn ip_address(&self, container: &str) -> Result<String, ContainerError>;
}

/// 基于 docker CLI 的实现
#[derive(Clone, Debug)]
pub struct DockerCli {
    work_dir: PathBuf,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
        }
    }

    async fn docker(&self, args: &[&str]) -> Result<std::process::Output, ContainerError> {
        debug!(args = ?args, "Running docker");
        Ok(CommandRunner::run_simple("docker", args, &self.work_dir, DOCKER_TIMEOUT).await?)
    }

    fn failed(args: &[&str], output: &std::process::Output) -> ContainerError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!(args = ?args, stderr = %stderr, "Docker command failed");
        ContainerError::CommandFailed {
            command: args.first().copied().unwrap_or_default().to_string(),
            stderr,
        }
    }

    /// `inspect` 失败且提示不存在时返回 false
    async fn exists(&self, args: &[&str]) -> Result<bool, ContainerError> {
        let output = self.docker(args).await?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such") {
            Ok(false)
        } else {
            Err(Self::failed(args, &output))
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

/// 生成 `docker create` 参数
pub fn create_args(configuration: &ContainerConfiguration) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), configuration.name.clone()];
    if configuration.auto_remove {
        args.push("--rm".to_string());
    }
    for (host, container) in &configuration.binds {
        args.push("-v".to_string());
        args.push(format!("{}:{}", host, container));
    }
    for (host, container) in &configuration.port_bindings {
        args.push("-p".to_string());
        args.push(format!("{}:{}", host, container));
    }
    for port in &configuration.exposed_ports {
        args.push("--expose".to_string());
        args.push(port.clone());
    }
    for env in &configuration.environment {
        args.push("-e".to_string());
        args.push(env.clone());
    }
    args.push(configuration.image.clone());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn image_available(&self, image: &str) -> Result<bool, ContainerError> {
        self.exists(&["image", "inspect", "--format", "{{.Id}}", image]).await
    }

    async fn container_available(&self, container: &str) -> Result<bool, ContainerError> {
        self.exists(&["container", "inspect", "--format", "{{.Id}}", container]).await
    }

    async fn container_running(&self, container: &str) -> Result<bool, ContainerError> {
        let args = ["container", "inspect", "--format", "{{.State.Running}}", container];
        let output = self.docker(&args).await?;
        if !output.status.success() {
            return Ok(false);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn create_container(&self, configuration: &ContainerConfiguration) -> Result<String, ContainerError> {
        let owned = create_args(configuration);
        let args: Vec<&str> = owned.iter().map(String::as_str).collect();
        let output = self.docker(&args).await?;
        if !output.status.success() {
            return Err(Self::failed(&args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn start_container(&self, container: &str) -> Result<(), ContainerError> {
        let args = ["start", container];
        let output = self.docker(&args).await?;
        if !output.status.success() {
            return Err(Self::failed(&args, &output));
        }
        Ok(())
    }

    async fn stop_container(&self, container: &str) -> Result<(), ContainerError> {
        let args = ["stop", container];
        let output = self.docker(&args).await?;
        if !output.status.success() {
            return Err(Self::failed(&args, &output));
        }
        Ok(())
    }

    async fn ip_address(&self, container: &str) -> Result<String, ContainerError> {
        let args = [
            "container",
            "inspect",
            "--format",
            "{{range .NetworkSettings.Networks}}{{.IPAddress}} {{end}}",
            container,
        ];
        let output = self.docker(&args).await?;
        if !output.status.success() {
            return Err(Self::failed(&args, &output));
        }
        String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| ContainerError::NoIpAddress(container.to_string()))
    }
}
