//! Ephemeral port allocation for the proxy process.

use tokio::net::TcpListener;

use crate::error::{CaptureError, Result};

/// Find a free local port by binding to port 0 and releasing the socket.
///
/// The port can in theory be taken by another process between release and
/// reuse. The proxy binds within milliseconds, and a lost race surfaces as
/// `ProxyStart` and is retried with a fresh port, so this is acceptable.
pub async fn find_free_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(CaptureError::PortAllocation)?;
    let port = listener
        .local_addr()
        .map_err(CaptureError::PortAllocation)?
        .port();
    drop(listener);
    Ok(port)
}

/// Use `requested` if it is free, otherwise fall back to an ephemeral
/// port. `None` always allocates ephemerally.
pub async fn resolve_port(requested: Option<u16>) -> Result<u16> {
    if let Some(port) = requested {
        if TcpListener::bind(("127.0.0.1", port)).await.is_ok() {
            return Ok(port);
        }
    }
    find_free_port().await
}
