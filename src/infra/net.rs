//! TCP 可达性探测

use std::time::Duration;
use tokio::net::TcpStream;

/// 单次连接探测超时
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// 能否建立到 host:port 的 TCP 连接
pub async fn is_reachable(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}
