//! 插件热重载客户端
//!
//! 通过服务器管理接口在不重启的情况下卸载和重新加载插件。
//!
//! 流程：
//! 1. 部署前对已部署的插件调用 [`HotReloadClient::disable`]，得到 [`ReloadOutcome`]
//! 2. 复制新的插件文件
//! 3. 以同一个 outcome 调用 [`HotReloadClient::enable`]
//!
//! 认证使用服务器写入数据目录的维护令牌。协议失败和连接失败只记录警告，
//! 不会中断部署。

use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::environment::{deployed_path, AdminEndpoint, PluginArtifact};
use crate::infra::net::is_reachable;

/// 维护令牌相对数据目录的位置
pub const SUPER_USER_TOKEN_PATH: &str = "system/pluginData/superUser/token.txt";

const ADMIN_PLUGINS_PATH: &str = "/httpAuth/admin/plugins.html";
const SAVE_TOKEN_HINT: &str = "Check the server was started with '-Dteamcity.superUser.token.saveToFile=true' property.";

const UNLOADED_SUCCESSFULLY: &str = "Plugin unloaded successfully";
const UNLOADED_PARTIALLY: &str = "Plugin unloaded partially";
const LOADED_SUCCESSFULLY: &str = "Plugin loaded successfully";

/// 一次禁用阶段下线的插件名集合
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReloadOutcome {
    names: Vec<String>,
}

impl ReloadOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str) {
        if !self.contains(name) {
            self.names.push(name.to_string());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// 维护令牌读取失败原因
#[derive(Debug)]
enum TokenError {
    Missing,
    Unreadable,
    Malformed,
}

/// 热重载客户端
pub struct HotReloadClient {
    client: Client,
    data_dir: PathBuf,
    admin: AdminEndpoint,
    /// 日志中的操作路径 (e.g., "deployToLocal")
    task: String,
}

impl HotReloadClient {
    /// 创建客户端
    ///
    /// 不使用连接池，也不设置请求超时
    pub fn new(data_dir: impl Into<PathBuf>, admin: AdminEndpoint, task: impl Into<String>) -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build unpooled HTTP client, falling back to default client");
                Client::new()
            });

        Self {
            client,
            data_dir: data_dir.into(),
            admin,
            task: task.into(),
        }
    }

    fn plugins_dir(&self) -> PathBuf {
        self.data_dir.join("plugins")
    }

    /// 禁用已部署的插件
    ///
    /// 尚未部署的插件直接记入结果，之后会被重新启用
    pub async fn disable(&self, artifacts: &[PluginArtifact]) -> ReloadOutcome {
        let mut outcome = ReloadOutcome::new();
        let plugins_dir = self.plugins_dir();

        for artifact in artifacts {
            if !deployed_path(&plugins_dir, artifact).exists() {
                debug!(task = %self.task, plugin = %artifact.name, "Plugin not deployed, nothing to unload");
                outcome.record(&artifact.name);
                continue;
            }

            let Some(body) = self.set_enabled(&artifact.name, false).await else {
                continue;
            };

            if body.contains(UNLOADED_SUCCESSFULLY) {
                info!(task = %self.task, plugin = %artifact.name, "Plugin successfully unloaded");
                outcome.record(&artifact.name);
            } else if body.contains(UNLOADED_PARTIALLY) {
                warn!(
                    task = %self.task,
                    plugin = %artifact.name,
                    "Plugin partially unloaded - some parts could still be running. Server restart could be needed."
                );
                outcome.record(&artifact.name);
            } else {
                warn!(
                    task = %self.task,
                    plugin = %artifact.name,
                    "Disabling plugin failed: {}",
                    strip_response_tags(&body)
                );
            }
        }
        outcome
    }

    /// 重新启用 `outcome` 中记录的插件
    pub async fn enable(&self, artifacts: &[PluginArtifact], outcome: &ReloadOutcome) {
        for artifact in artifacts.iter().filter(|a| outcome.contains(&a.name)) {
            let Some(body) = self.set_enabled(&artifact.name, true).await else {
                continue;
            };

            if body.contains(LOADED_SUCCESSFULLY) {
                info!(task = %self.task, plugin = %artifact.name, "Plugin successfully loaded");
            } else {
                warn!(
                    task = %self.task,
                    plugin = %artifact.name,
                    "Enabling plugin failed: {}",
                    strip_response_tags(&body)
                );
            }
        }
    }

    /// 发送 setEnabled 请求，成功时返回响应体
    async fn set_enabled(&self, plugin_name: &str, enabled: bool) -> Option<String> {
        let base_url = self.admin.base_url();
        if !is_reachable(&self.admin.host, self.admin.port).await {
            info!(task = %self.task, "Cannot connect to the server on {}.", base_url);
            return None;
        }

        let token = match read_token(&self.data_dir) {
            Ok(token) => token,
            Err(TokenError::Missing) => {
                warn!(task = %self.task, "Maintenance token file does not exist. Cannot reload plugin.");
                warn!(task = %self.task, "{}", SAVE_TOKEN_HINT);
                return None;
            }
            Err(TokenError::Unreadable) => {
                warn!(task = %self.task, "Failure reading super user token file");
                return None;
            }
            Err(TokenError::Malformed) => {
                warn!(task = %self.task, "Malformed maintenance token");
                return None;
            }
        };
        debug!(task = %self.task, "Using {} maintenance token to authenticate", token);

        let url = match action_url(&base_url, plugin_name, enabled) {
            Ok(url) => url,
            Err(e) => {
                warn!(task = %self.task, error = %e, "Failure creating plugin action URL");
                return None;
            }
        };
        debug!(task = %self.task, "Sending {}", url);

        let response = match self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, basic_auth(&token))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(task = %self.task, error = %e, "Cannot connect to server.");
                return None;
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(
                task = %self.task,
                "Cannot authenticate with server on {} with maintenance token {}.",
                base_url,
                token
            );
            warn!(task = %self.task, "{}", SAVE_TOKEN_HINT);
            return None;
        }
        if !status.is_success() {
            warn!(task = %self.task, "Cannot connect to the server on {}: {}", base_url, status.as_u16());
            return None;
        }

        match response.text().await {
            Ok(body) => Some(body.lines().collect()),
            Err(e) => {
                warn!(task = %self.task, error = %e, "Failure reading response from server");
                None
            }
        }
    }
}

/// 读取维护令牌，去除首尾空白后必须是整数
fn read_token(data_dir: &Path) -> Result<String, TokenError> {
    let path = data_dir.join(SUPER_USER_TOKEN_PATH);
    if !path.is_file() {
        return Err(TokenError::Missing);
    }
    let content = std::fs::read_to_string(&path).map_err(|_| TokenError::Unreadable)?;
    content
        .trim()
        .parse::<i64>()
        .map(|token| token.to_string())
        .map_err(|_| TokenError::Malformed)
}

/// `Basic base64(":" + token)`
pub fn basic_auth(token: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!(":{}", token));
    format!("Basic {}", encoded)
}

/// 构造插件启用/禁用地址
///
/// `pluginPath` 使用服务器识别的数据目录占位符
pub fn action_url(base_url: &str, plugin_name: &str, enabled: bool) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!("{}{}", base_url, ADMIN_PLUGINS_PATH))?;
    url.query_pairs_mut()
        .append_pair("action", "setEnabled")
        .append_pair("enabled", if enabled { "true" } else { "false" })
        .append_pair("pluginPath", &format!("<TeamCity Data Directory>/plugins/{}", plugin_name));
    Ok(url)
}

fn strip_response_tags(body: &str) -> String {
    body.replace("<response>", "").replace("</response>", "")
}
