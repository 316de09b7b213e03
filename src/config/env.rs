//! 环境变量覆盖
//!
//! 全局覆盖使用 `TC_ENV_<KEY>`，单个环境使用 `TC_ENV_<NAME>_<KEY>`

use std::collections::HashMap;
use std::env;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "TC_ENV_";

/// 配置文件路径变量
pub const CONFIG_PATH_VAR: &str = "TC_ENV_CONFIG";

/// 环境变量覆盖集合
#[derive(Clone, Debug, Default)]
pub struct EnvOverrides {
    vars: HashMap<String, String>,
}

impl EnvOverrides {
    /// 从进程环境加载
    pub fn from_env() -> Self {
        Self::from_pairs(env::vars())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .filter(|(_, v)| !v.is_empty())
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    /// 全局覆盖，例如 `global("DOWNLOADS_DIR")` 读取 `TC_ENV_DOWNLOADS_DIR`
    pub fn global(&self, key: &str) -> Option<String> {
        self.get(&format!("{ENV_PREFIX}{key}"))
    }

    /// 单个环境的覆盖，例如 `environment("local", "DATA_DIR")` 读取 `TC_ENV_LOCAL_DATA_DIR`
    pub fn environment(&self, name: &str, key: &str) -> Option<String> {
        self.get(&environment_key(name, key))
    }
}

/// 环境名转换为变量名片段：大写，非字母数字替换为 `_`
pub fn environment_key(name: &str, key: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{ENV_PREFIX}{name}_{key}")
}

/// 常量
pub mod constants {
    /// 默认配置文件
    pub const DEFAULT_CONFIG_FILE: &str = "tc-environments.toml";

    pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
    pub const DEFAULT_BASE_DOWNLOAD_URL: &str = "https://download.jetbrains.com/teamcity";
    pub const DEFAULT_BASE_HOME_DIR: &str = "servers";
    pub const DEFAULT_BASE_DATA_DIR: &str = "data";

    /// 未指定时的环境版本
    pub const DEFAULT_VERSION: &str = "9.0";

    /// 服务器停止等待（秒）
    pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

    pub const DEFAULT_SERVER_OPTIONS: [&str; 4] = [
        "-Dteamcity.development.mode=true",
        "-Dteamcity.development.shadowCopyClasses=true",
        "-Dteamcity.superUser.token.saveToFile=true",
        "-Dteamcity.kotlinConfigsDsl.generateDslDocs=false",
    ];

    pub const DEFAULT_SERVER_IMAGE: &str = "jetbrains/teamcity-server";
    pub const DEFAULT_AGENT_IMAGE: &str = "jetbrains/teamcity-agent";
    pub const DEFAULT_SERVER_NAME: &str = "teamcity-server";
    pub const DEFAULT_AGENT_NAME: &str = "teamcity-agent";
    pub const DEFAULT_SERVER_PORT: u16 = 8111;
}
