//! 容器相关领域模型

use serde::Serialize;
use std::path::Path;

/// 创建容器所需的配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerConfiguration {
    pub image: String,
    pub name: String,
    pub auto_remove: bool,
    /// 宿主机路径 -> 容器路径
    pub binds: Vec<(String, String)>,
    /// 宿主机端口 -> 容器端口
    pub port_bindings: Vec<(String, String)>,
    pub exposed_ports: Vec<String>,
    /// `KEY=VALUE` 形式的环境变量
    pub environment: Vec<String>,
}

impl ContainerConfiguration {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn auto_remove(mut self) -> Self {
        self.auto_remove = true;
        self
    }

    pub fn bind(mut self, host_path: &Path, container_path: &str) -> Self {
        self.binds
            .push((host_path.to_string_lossy().to_string(), container_path.to_string()));
        self
    }

    pub fn bind_port(mut self, host_port: impl Into<String>, container_port: impl Into<String>) -> Self {
        self.port_bindings.push((host_port.into(), container_port.into()));
        self
    }

    pub fn expose_port(mut self, port: impl Into<String>) -> Self {
        self.exposed_ports.push(port.into());
        self
    }

    pub fn environment(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.environment.push(format!("{}={}", name, value.as_ref()));
        self
    }
}

/// 从 JVM 参数中提取 JDWP 调试端口
///
/// 例如 `-agentlib:jdwp=transport=dt_socket,server=y,address=*:5005` -> `5005`
pub fn debug_port(options: &str) -> Option<String> {
    options
        .split(' ')
        .filter(|option| option.contains("jdwp"))
        .flat_map(|option| option.split(','))
        .filter(|param| param.contains("address="))
        .map(|param| param.replace("address=", ""))
        .map(|value| match value.rfind(':') {
            Some(index) => value[index + 1..].to_string(),
            None => value,
        })
        .next()
}
