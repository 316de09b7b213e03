//! 环境配置文件
//!
//! 从 `tc-environments.toml` 读取环境声明，叠加环境变量覆盖后解析为
//! [`Environment`] 列表

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::env::constants::*;
use super::env::EnvOverrides;
use crate::domain::environment::{
    AdminEndpoint, ContainerSettings, Environment, EnvironmentKind, LocalSettings, PluginArtifact,
    DEFAULT_ADMIN_HOST,
};
use crate::domain::version::TeamCityVersion;
use crate::error::{ConfigError, ValidationError};
use crate::services::shutdown::shutdown_timeout;

/// 配置文件顶层结构
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EnvironmentsConfig {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default, rename = "environment")]
    pub environments: Vec<EnvironmentEntry>,
}

/// 所有环境共享的默认值
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub downloads_dir: String,
    pub base_download_url: String,
    pub base_home_dir: String,
    pub base_data_dir: String,
    pub shutdown_timeout: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            downloads_dir: DEFAULT_DOWNLOADS_DIR.to_string(),
            base_download_url: DEFAULT_BASE_DOWNLOAD_URL.to_string(),
            base_home_dir: DEFAULT_BASE_HOME_DIR.to_string(),
            base_data_dir: DEFAULT_BASE_DATA_DIR.to_string(),
            shutdown_timeout: None,
        }
    }
}

/// 单个环境声明
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EnvironmentEntry {
    pub name: String,
    pub version: Option<String>,
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub plugins: Vec<PathBuf>,
    pub server_options: Option<Vec<String>>,
    #[serde(default)]
    pub agent_options: Vec<String>,
    pub home_dir: Option<PathBuf>,
    pub java_home: Option<PathBuf>,
    pub download_url: Option<String>,
    pub admin_host: Option<String>,
    pub admin_port: Option<u16>,
    pub shutdown_timeout: Option<String>,
    pub docker: Option<DockerEntry>,
}

/// 容器环境声明，未填写的字段使用默认镜像和名称
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DockerEntry {
    pub server_image: Option<String>,
    pub server_tag: Option<String>,
    pub server_name: Option<String>,
    pub agent_image: Option<String>,
    pub agent_tag: Option<String>,
    pub agent_name: Option<String>,
    pub port: Option<u16>,
}

impl EnvironmentsConfig {
    /// 读取并解析配置文件
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded environments configuration");
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// 叠加环境变量覆盖，解析出全部环境
    pub fn resolve(&self, overrides: &EnvOverrides) -> Result<Vec<Environment>, ConfigError> {
        let defaults = self.defaults.with_overrides(overrides);
        let mut seen = HashSet::new();
        let mut environments = Vec::with_capacity(self.environments.len());

        for entry in &self.environments {
            if entry.name.is_empty() {
                return Err(ValidationError::PropertyNotSet("name").into());
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ValidationError::DuplicateEnvironment(entry.name.clone()).into());
            }
            environments.push(entry.resolve(&defaults, overrides)?);
        }
        Ok(environments)
    }
}

impl Defaults {
    fn with_overrides(&self, overrides: &EnvOverrides) -> Self {
        Self {
            downloads_dir: overrides
                .global("DOWNLOADS_DIR")
                .unwrap_or_else(|| self.downloads_dir.clone()),
            base_download_url: overrides
                .global("BASE_DOWNLOAD_URL")
                .unwrap_or_else(|| self.base_download_url.clone()),
            base_home_dir: overrides
                .global("BASE_HOME_DIR")
                .unwrap_or_else(|| self.base_home_dir.clone()),
            base_data_dir: overrides
                .global("BASE_DATA_DIR")
                .unwrap_or_else(|| self.base_data_dir.clone()),
            shutdown_timeout: overrides
                .global("SHUTDOWN_TIMEOUT")
                .or_else(|| self.shutdown_timeout.clone()),
        }
    }
}

impl EnvironmentEntry {
    fn resolve(&self, defaults: &Defaults, overrides: &EnvOverrides) -> Result<Environment, ValidationError> {
        let name = self.name.as_str();
        let version = TeamCityVersion::parse(self.version.as_deref().unwrap_or(DEFAULT_VERSION), false)?;

        let data_dir = match overrides.environment(name, "DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => match &self.data_dir {
                Some(dir) => dir.clone(),
                None => Path::new(&defaults.base_data_dir).join(version.data_version()?),
            },
        };

        let server_options = match overrides.environment(name, "SERVER_OPTIONS") {
            Some(line) => split_options(&line),
            None => self
                .server_options
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVER_OPTIONS.iter().map(|s| s.to_string()).collect()),
        };
        let agent_options = match overrides.environment(name, "AGENT_OPTIONS") {
            Some(line) => split_options(&line),
            None => self.agent_options.clone(),
        };

        let timeout = overrides
            .environment(name, "SHUTDOWN_TIMEOUT")
            .or_else(|| self.shutdown_timeout.clone())
            .or_else(|| defaults.shutdown_timeout.clone());

        let kind = match &self.docker {
            Some(docker) => EnvironmentKind::Container(docker.resolve(name, &version, overrides)?),
            None => EnvironmentKind::Local(self.local_settings(&version, defaults, overrides)),
        };

        let default_admin_port = match &kind {
            EnvironmentKind::Container(settings) => settings.port,
            EnvironmentKind::Local(_) => DEFAULT_SERVER_PORT,
        };
        let admin = AdminEndpoint::new(
            self.admin_host.as_deref().unwrap_or(DEFAULT_ADMIN_HOST),
            self.admin_port.unwrap_or(default_admin_port),
        );

        Ok(Environment {
            name: self.name.clone(),
            version,
            data_dir,
            plugins: self.plugins.iter().map(PluginArtifact::from_path).collect(),
            server_options,
            agent_options,
            admin,
            shutdown_timeout: shutdown_timeout(timeout.as_deref()),
            kind,
        })
    }

    fn local_settings(&self, version: &TeamCityVersion, defaults: &Defaults, overrides: &EnvOverrides) -> LocalSettings {
        let name = self.name.as_str();
        let home_dir = overrides
            .environment(name, "HOME_DIR")
            .map(PathBuf::from)
            .or_else(|| self.home_dir.clone())
            .unwrap_or_else(|| Path::new(&defaults.base_home_dir).join(format!("TeamCity-{version}")));

        let download_url = overrides
            .environment(name, "DOWNLOAD_URL")
            .or_else(|| self.download_url.clone())
            .unwrap_or_else(|| format!("{}/TeamCity-{}.tar.gz", defaults.base_download_url, version));
        let installer_file = Path::new(&defaults.downloads_dir).join(url_filename(&download_url));

        // 未配置时使用进程的 JAVA_HOME
        let java_home = match overrides.environment(name, "JAVA_HOME") {
            Some(dir) => Some(PathBuf::from(dir)),
            None => self
                .java_home
                .clone()
                .or_else(|| overrides.get("JAVA_HOME").map(PathBuf::from)),
        };

        LocalSettings {
            home_dir,
            java_home,
            download_url,
            installer_file,
        }
    }
}

/// 只检查最后一段路径，仓库地址中的端口不算标签
fn image_has_tag(image: &str) -> bool {
    image.rsplit('/').next().is_some_and(|name| name.contains(':'))
}

impl DockerEntry {
    fn resolve(
        &self,
        name: &str,
        version: &TeamCityVersion,
        overrides: &EnvOverrides,
    ) -> Result<ContainerSettings, ValidationError> {
        let server_image = self.server_image.clone().unwrap_or_else(|| DEFAULT_SERVER_IMAGE.to_string());
        if image_has_tag(&server_image) {
            return Err(ValidationError::ImageWithTag("serverImage"));
        }
        let agent_image = self.agent_image.clone().unwrap_or_else(|| DEFAULT_AGENT_IMAGE.to_string());
        if image_has_tag(&agent_image) {
            return Err(ValidationError::ImageWithTag("agentImage"));
        }

        let port = overrides
            .environment(name, "PORT")
            .and_then(|v| v.parse().ok())
            .or(self.port)
            .unwrap_or(DEFAULT_SERVER_PORT);

        Ok(ContainerSettings {
            server_image,
            server_tag: self.server_tag.clone().unwrap_or_else(|| version.to_string()),
            server_name: self.server_name.clone().unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string()),
            agent_image,
            agent_tag: self.agent_tag.clone().unwrap_or_else(|| version.to_string()),
            agent_name: self.agent_name.clone().unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string()),
            port,
        })
    }
}

fn split_options(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

/// URL 最后一个 `/` 之后的部分
fn url_filename(url: &str) -> &str {
    match url.rfind('/') {
        Some(index) => &url[index + 1..],
        None => url,
    }
}
