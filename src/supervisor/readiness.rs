//! Port checks used for readiness polling and leak detection

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::common::{Error, Result};

/// Timeout for a single liveness connect
const CHECK_TIMEOUT: Duration = Duration::from_millis(200);

/// Whether something accepts TCP connections at `addr`
pub async fn can_connect(addr: SocketAddr, limit: Duration) -> bool {
    matches!(
        tokio::time::timeout(limit, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Whether no listener remains on `addr`
pub async fn port_released(addr: SocketAddr) -> bool {
    !can_connect(addr, CHECK_TIMEOUT).await
}

/// Refuse to launch onto a port someone else already listens on
///
/// Readiness is judged by connecting, so a stale listener would make a
/// freshly started server look ready.
pub async fn ensure_port_free(addr: SocketAddr) -> Result<()> {
    if can_connect(addr, CHECK_TIMEOUT).await {
        return Err(Error::PortInUse { addr });
    }
    Ok(())
}
