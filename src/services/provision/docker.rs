//! Docker 容器环境
//!
//! 服务器和 Agent 分别运行在独立容器中，数据目录通过 bind mount 共享，
//! 因此部署逻辑与本地环境一致。

use async_trait::async_trait;
use std::sync::Arc;
use tokio::fs;
use tracing::info;

use super::{ProvisioningBackend, Role};
use crate::domain::container::{debug_port, ContainerConfiguration};
use crate::domain::environment::ContainerSettings;
use crate::error::{LifecycleError, LifecycleResult};
use crate::infra::docker::{ContainerError, ContainerRuntime};
use crate::services::lifecycle::context::OperationContext;

const SERVER_PORT: &str = "8111";
const SERVER_DATA_DIR: &str = "/data/teamcity_server/datadir";
const SERVER_LOGS_DIR: &str = "/opt/teamcity/logs";
const AGENT_CONF_DIR: &str = "/data/teamcity_agent/conf";

/// Docker 后端
pub struct DockerBackend {
    settings: ContainerSettings,
    runtime: Arc<dyn ContainerRuntime>,
}

impl DockerBackend {
    pub fn new(settings: ContainerSettings, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { settings, runtime }
    }

    async fn require_image(&self, image: &str) -> LifecycleResult<()> {
        if !self.runtime.image_available(image).await? {
            return Err(ContainerError::ImageNotAvailable(image.to_string()).into());
        }
        Ok(())
    }

    /// 不存在时创建容器
    async fn create_if_absent(&self, ctx: &OperationContext, configuration: &ContainerConfiguration) -> LifecycleResult<()> {
        if self.runtime.container_available(&configuration.name).await? {
            info!(task = %ctx.task, container = %configuration.name, "Container already exists");
            return Ok(());
        }
        let id = self.runtime.create_container(configuration).await?;
        info!(task = %ctx.task, container = %configuration.name, id = %id, "Created container");
        Ok(())
    }

    fn server_configuration(&self, ctx: &OperationContext) -> ContainerConfiguration {
        let env = &ctx.environment;
        let options = env.server_options_line();
        let mut configuration = ContainerConfiguration::builder()
            .image(self.settings.server_image_ref())
            .name(&self.settings.server_name)
            .auto_remove()
            .bind(&env.data_dir, SERVER_DATA_DIR)
            .bind(&env.server_logs_dir(), SERVER_LOGS_DIR)
            .bind_port(self.settings.port.to_string(), SERVER_PORT)
            .environment("TEAMCITY_SERVER_OPTS", &options);
        if let Some(port) = debug_port(&options) {
            configuration = configuration.bind_port(port.clone(), port.clone()).expose_port(port);
        }
        configuration
    }

    fn agent_configuration(&self, ctx: &OperationContext, server_ip: &str) -> ContainerConfiguration {
        let env = &ctx.environment;
        let options = env.agent_options_line();
        let mut configuration = ContainerConfiguration::builder()
            .image(self.settings.agent_image_ref())
            .name(&self.settings.agent_name)
            .auto_remove()
            .bind(&env.agent_config_dir(), AGENT_CONF_DIR)
            .environment("SERVER_URL", format!("http://{}:{}/", server_ip, SERVER_PORT))
            .environment("TEAMCITY_AGENT_OPTS", &options);
        if let Some(port) = debug_port(&options) {
            configuration = configuration.bind_port(port.clone(), port.clone()).expose_port(port);
        }
        configuration
    }

    async fn start_server(&self, ctx: &OperationContext) -> LifecycleResult<()> {
        let image = self.settings.server_image_ref();
        self.require_image(&image).await?;

        let name = &self.settings.server_name;
        if self.runtime.container_running(name).await? {
            info!(task = %ctx.task, container = %name, "TeamCity Server container is already running");
            return Ok(());
        }

        let env = &ctx.environment;
        for dir in [env.data_dir.clone(), env.server_logs_dir()] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| LifecycleError::io("Failed to create environment data directory", e))?;
        }

        self.create_if_absent(ctx, &self.server_configuration(ctx)).await?;
        self.runtime.start_container(name).await?;
        info!(task = %ctx.task, container = %name, "Started TeamCity Server container");
        Ok(())
    }

    async fn start_agent(&self, ctx: &OperationContext) -> LifecycleResult<()> {
        let image = self.settings.agent_image_ref();
        self.require_image(&image).await?;

        let name = &self.settings.agent_name;
        if self.runtime.container_running(name).await? {
            info!(task = %ctx.task, container = %name, "TeamCity Build Agent container is already running");
            return Ok(());
        }

        let server = &self.settings.server_name;
        if !self.runtime.container_running(server).await? {
            return Err(ContainerError::ServerNotRunning(server.clone()).into());
        }
        let server_ip = self.runtime.ip_address(server).await?;

        fs::create_dir_all(ctx.environment.agent_config_dir())
            .await
            .map_err(|e| LifecycleError::io("Failed to create agent configuration directory", e))?;

        self.create_if_absent(ctx, &self.agent_configuration(ctx, &server_ip)).await?;
        self.runtime.start_container(name).await?;
        info!(task = %ctx.task, container = %name, "Started TeamCity Build Agent container");
        Ok(())
    }

    fn container_name(&self, role: Role) -> &str {
        match role {
            Role::Server => &self.settings.server_name,
            Role::Agent => &self.settings.agent_name,
        }
    }
}

#[async_trait]
impl ProvisioningBackend for DockerBackend {
    /// 镜像需预先拉取，只检查是否可用
    async fn provision(&self, ctx: &OperationContext) -> LifecycleResult<()> {
        for image in [self.settings.server_image_ref(), self.settings.agent_image_ref()] {
            self.require_image(&image).await?;
            info!(task = %ctx.task, image = %image, "Docker image available");
        }
        Ok(())
    }

    async fn start_runtime(&self, ctx: &OperationContext, role: Role) -> LifecycleResult<()> {
        match role {
            Role::Server => self.start_server(ctx).await,
            Role::Agent => self.start_agent(ctx).await,
        }
    }

    async fn stop_runtime(&self, ctx: &OperationContext, role: Role) -> LifecycleResult<()> {
        let name = self.container_name(role);
        if !self.runtime.container_running(name).await? {
            info!(task = %ctx.task, container = %name, "Container is already stopped");
            return Ok(());
        }
        self.runtime.stop_container(name).await?;
        info!(task = %ctx.task, container = %name, "Container stopped");
        Ok(())
    }
}
