//! 统一错误处理
//!
//! 致命错误按关注点划分为几个 `thiserror` 枚举。热重载协议失败与连接失败
//! 不在这里：它们只记录日志，不会中断部署。

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::infra::command::CommandError;
use crate::infra::docker::ContainerError;

/// 配置或输入校验错误（致命）
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("'{0}' is not a valid TeamCity version string (examples: '9.0', '10.0.5', '2018.1')")]
    InvalidRelease(String),

    #[error("'{0}' is not a valid TeamCity version string (examples: '10.0-SNAPSHOT', '2021.1' '2021.2.1-SNAPSHOT')")]
    InvalidSnapshot(String),

    #[error("Unable to derive a data version from '{0}'")]
    InvalidDataVersion(String),

    #[error("Property '{0}' not set.")]
    PropertyNotSet(&'static str),

    #[error("Directory '{path}' specified for property '{property}' does not exist.")]
    MissingDirectory { property: &'static str, path: PathBuf },

    #[error("Directory '{path}' specified for property '{property}' is not a directory.")]
    NotADirectory { property: &'static str, path: PathBuf },

    #[error("Environment '{0}' is declared more than once")]
    DuplicateEnvironment(String),

    #[error("{0} must not include a tag.")]
    ImageWithTag(&'static str),

    #[error("Environment '{0}' not found")]
    UnknownEnvironment(String),

    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("Agent plugin cannot be configured for plugin deployment and tool deployment")]
    ConflictingDeployment,
}

/// 生命周期操作错误
///
/// 只终止当前环境的操作，不影响其他环境
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Time out waiting for TeamCity Server at {host}:{port} to shutdown after {timeout:?}.")]
    ShutdownTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("Download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("Operation graph for '{0}' contains a cycle")]
    Cycle(String),

    #[error("Run for environment '{0}' was aborted")]
    TaskAborted(String),
}

impl LifecycleError {
    /// 包装 IO 错误并附带上下文
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// 描述文件生成错误
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Failed to write descriptor XML: {0}")]
    Xml(String),

    #[error("Failed to write descriptor to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// 便捷类型别名
pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages() {
        let err = ValidationError::InvalidRelease("abc".to_string());
        assert_eq!(
            err.to_string(),
            "'abc' is not a valid TeamCity version string (examples: '9.0', '10.0.5', '2018.1')"
        );

        let err = ValidationError::MissingDirectory {
            property: "homeDir",
            path: PathBuf::from("/missing"),
        };
        assert!(err.to_string().contains("'homeDir' does not exist"));
    }

    #[test]
    fn test_validation_converts_into_lifecycle_error() {
        let err: LifecycleError = ValidationError::PropertyNotSet("javaHome").into();
        assert!(matches!(err, LifecycleError::Validation(_)));
        assert_eq!(err.to_string(), "Property 'javaHome' not set.");
    }
}
