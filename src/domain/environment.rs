//! 环境相关领域模型

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::version::TeamCityVersion;

/// 默认管理端点
pub const DEFAULT_ADMIN_HOST: &str = "localhost";
pub const DEFAULT_ADMIN_PORT: u16 = 8111;

/// 插件产物（启用/禁用的基本单位）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PluginArtifact {
    pub path: PathBuf,
    pub name: String,
}

impl PluginArtifact {
    /// 从文件路径创建，名称取文件名
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self { path, name }
    }
}

/// 热重载使用的管理端点
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AdminEndpoint {
    pub host: String,
    pub port: u16,
}

impl AdminEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Default for AdminEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_ADMIN_HOST, DEFAULT_ADMIN_PORT)
    }
}

/// 本地安装环境的设置
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LocalSettings {
    /// TeamCity 安装目录
    pub home_dir: PathBuf,
    /// 启动服务器和 Agent 使用的 Java 目录
    pub java_home: Option<PathBuf>,
    /// 发行包下载地址
    pub download_url: String,
    /// 下载后的安装包路径
    pub installer_file: PathBuf,
}

/// Docker 容器环境的设置
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContainerSettings {
    pub server_image: String,
    pub server_tag: String,
    pub server_name: String,
    pub agent_image: String,
    pub agent_tag: String,
    pub agent_name: String,
    /// 发布到宿主机的服务器端口
    pub port: u16,
}

impl ContainerSettings {
    pub fn server_image_ref(&self) -> String {
        format!("{}:{}", self.server_image, self.server_tag)
    }

    pub fn agent_image_ref(&self) -> String {
        format!("{}:{}", self.agent_image, self.agent_tag)
    }
}

/// 环境类型
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvironmentKind {
    Local(LocalSettings),
    Container(ContainerSettings),
}

/// 一个独立版本化的目标环境
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Environment {
    pub name: String,
    #[serde(serialize_with = "serialize_version")]
    pub version: TeamCityVersion,
    pub data_dir: PathBuf,
    pub plugins: Vec<PluginArtifact>,
    pub server_options: Vec<String>,
    pub agent_options: Vec<String>,
    pub admin: AdminEndpoint,
    /// 停止服务器后等待端口关闭的时长
    pub shutdown_timeout: Duration,
    pub kind: EnvironmentKind,
}

fn serialize_version<S: serde::Serializer>(
    version: &TeamCityVersion,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(version.as_str())
}

impl Environment {
    pub fn plugins_dir(&self) -> PathBuf {
        self.data_dir.join("plugins")
    }

    pub fn server_logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn agent_config_dir(&self) -> PathBuf {
        self.data_dir.join("agent").join("conf")
    }

    pub fn agent_logs_dir(&self) -> PathBuf {
        self.data_dir.join("agent").join("logs")
    }

    /// 空格拼接的服务器 JVM 参数
    pub fn server_options_line(&self) -> String {
        self.server_options.join(" ")
    }

    pub fn agent_options_line(&self) -> String {
        self.agent_options.join(" ")
    }

    pub fn is_containerized(&self) -> bool {
        matches!(self.kind, EnvironmentKind::Container(_))
    }
}

pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// 返回插件在数据目录中的目标路径
pub fn deployed_path(plugins_dir: &Path, artifact: &PluginArtifact) -> PathBuf {
    plugins_dir.join(&artifact.name)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// 测试用的本地环境
    pub fn local_environment(name: &str, version: &str, data_dir: &Path) -> Environment {
        Environment {
            name: name.to_string(),
            version: TeamCityVersion::parse(version, true).unwrap(),
            data_dir: data_dir.to_path_buf(),
            plugins: Vec::new(),
            server_options: Vec::new(),
            agent_options: Vec::new(),
            admin: AdminEndpoint::default(),
            shutdown_timeout: Duration::from_secs(10),
            kind: EnvironmentKind::Local(LocalSettings {
                home_dir: data_dir.join("home"),
                java_home: None,
                download_url: format!("https://download.jetbrains.com/teamcity/TeamCity-{version}.tar.gz"),
                installer_file: data_dir.join("downloads").join(format!("TeamCity-{version}.tar.gz")),
            }),
        }
    }

    pub fn container_environment(name: &str, version: &str, data_dir: &Path) -> Environment {
        Environment {
            kind: EnvironmentKind::Container(ContainerSettings {
                server_image: "jetbrains/teamcity-server".to_string(),
                server_tag: version.to_string(),
                server_name: "teamcity-server".to_string(),
                agent_image: "jetbrains/teamcity-agent".to_string(),
                agent_tag: version.to_string(),
                agent_name: "teamcity-agent".to_string(),
                port: 8111,
            }),
            ..local_environment(name, version, data_dir)
        }
    }
}
