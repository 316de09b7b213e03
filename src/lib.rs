//! TeamCity 环境部署代理
//!
//! 把插件部署到本地安装或 Docker 容器中的 TeamCity 环境，
//! 并通过管理接口热重载插件。

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

/// 初始化日志，`RUST_LOG` 可覆盖默认级别
///
/// 日志写到 stderr，stdout 留给命令输出。
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
