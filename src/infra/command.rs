//! 命令执行器
//!
//! 提供统一的外部命令执行接口，支持：
//! - 超时控制
//! - 附加环境变量
//! - 输出按行写入日志

use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// 外部命令默认超时
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed { program: String, source: std::io::Error },
    /// 命令超时
    Timeout { program: String, timeout: Duration },
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed { program, source } => {
                write!(f, "Failed to spawn command '{}': {}", program, source)
            }
            CommandError::Timeout { program, timeout } => {
                write!(f, "Command '{}' timed out after {:?}", program, timeout)
            }
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed { source, .. } => Some(source),
            CommandError::Timeout { .. } => None,
        }
    }
}

impl CommandRunner {
    /// 执行简单命令（无附加环境变量）
    pub async fn run_simple(
        program: &str,
        args: &[&str],
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<std::process::Output, CommandError> {
        Self::run_with_env(program, args, &[], work_dir, timeout).await
    }

    /// 执行命令并附加环境变量
    ///
    /// 超时后子进程随 future 一起被终止
    pub async fn run_with_env(
        program: &str,
        args: &[&str],
        envs: &[(&str, String)],
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<std::process::Output, CommandError> {
        let child = Command::new(program)
            .args(args)
            .envs(envs.iter().map(|(k, v)| (*k, v.as_str())))
            .current_dir(work_dir)
            .kill_on_drop(true)
            .output();

        tokio::select! {
            result = child => {
                result.map_err(|source| CommandError::SpawnFailed {
                    program: program.to_string(),
                    source,
                })
            }
            _ = tokio::time::sleep(timeout) => {
                Err(CommandError::Timeout {
                    program: program.to_string(),
                    timeout,
                })
            }
        }
    }

    /// 将命令输出写入日志，退出码只记录不判定
    pub fn log_output(task: &str, output: &std::process::Output) {
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            info!(task = %task, "{}", line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            warn!(task = %task, "{}", line);
        }
        if !output.status.success() {
            warn!(task = %task, status = %output.status, "Command exited with non-zero status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_run_simple_success() {
        let result = CommandRunner::run_simple(
            "echo",
            &["hello"],
            &PathBuf::from("/tmp"),
            Duration::from_secs(5),
        )
        .await;

        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("hello"));
    }

    #[tokio::test]
    async fn test_run_with_env() {
        let output = CommandRunner::run_with_env(
            "sh",
            &["-c", "echo $TC_TEST_VALUE"],
            &[("TC_TEST_VALUE", "from-env".to_string())],
            &PathBuf::from("/tmp"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "from-env");
    }

    #[tokio::test]
    async fn test_run_simple_not_found() {
        let result = CommandRunner::run_simple(
            "nonexistent_command_12345",
            &[],
            &PathBuf::from("/tmp"),
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(result, Err(CommandError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_run_simple_timeout() {
        let result = CommandRunner::run_simple(
            "sleep",
            &["5"],
            &PathBuf::from("/tmp"),
            Duration::from_millis(100),
        )
        .await;

        assert!(matches!(result, Err(CommandError::Timeout { .. })));
    }
}
