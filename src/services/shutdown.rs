//! 等待服务器关闭
//!
//! 发出停止命令后轮询管理端口，直到端口不可达或超时

use std::time::{Duration, Instant};
use tracing::info;

use crate::config::env::constants::DEFAULT_SHUTDOWN_TIMEOUT_SECS;
use crate::error::{LifecycleError, LifecycleResult};
use crate::infra::net::is_reachable;

/// 首次探测前的等待
const INITIAL_DELAY: Duration = Duration::from_millis(250);

/// 两次探测间隔
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 解析超时秒数，缺失或无法解析时使用默认值
pub fn shutdown_timeout(value: Option<&str>) -> Duration {
    let secs = value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// 等待 host:port 停止监听
pub async fn wait_for_shutdown(task: &str, host: &str, port: u16, timeout: Duration) -> LifecycleResult<()> {
    info!(
        task = %task,
        timeout_secs = timeout.as_secs(),
        "TeamCity Server shutdown requested"
    );
    tokio::time::sleep(INITIAL_DELAY).await;

    let mut remaining = timeout;
    while !remaining.is_zero() && is_reachable(host, port).await {
        info!(task = %task, "TeamCity Server is still running");
        let start = Instant::now();
        tokio::time::sleep(POLL_INTERVAL).await;
        remaining = remaining.saturating_sub(start.elapsed());
    }

    if is_reachable(host, port).await {
        return Err(LifecycleError::ShutdownTimeout {
            host: host.to_string(),
            port,
            timeout,
        });
    }
    info!(task = %task, "TeamCity Server has stopped");
    Ok(())
}
