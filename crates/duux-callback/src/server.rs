//! Loopback callback server lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use duux_capture::{Credential, Handoff, MemoryHandoff};

use crate::error::{CallbackError, Result};
use crate::routes::{AppState, router};

/// Short-lived HTTP listener on an ephemeral loopback port that accepts
/// one credential POST per session.
///
/// Each `bind` gets a fresh hand-off slot, so a later session never
/// observes an earlier session's credential.
pub struct CallbackServer {
    port: u16,
    handoff: Arc<MemoryHandoff>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    serve_handle: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind to `127.0.0.1:0` and start serving.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(CallbackError::Bind)?;
        let port = listener
            .local_addr()
            .map_err(CallbackError::Bind)?
            .port();

        let handoff = MemoryHandoff::shared();
        let app = router(AppState {
            handoff: handoff.clone(),
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serve_handle = tokio::spawn(async move {
            // Dropping the sender also resolves the shutdown future, so
            // an un-shutdown server still stops when this struct drops.
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "Callback server exited with error");
            }
        });

        info!(port, "Credential callback server started");
        Ok(Self {
            port,
            handoff,
            shutdown_tx: Some(shutdown_tx),
            serve_handle: Some(serve_handle),
        })
    }

    /// The ephemeral port the server listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The hand-off slot the POST handler fills.
    pub fn handoff(&self) -> Arc<MemoryHandoff> {
        self.handoff.clone()
    }

    /// Wait for a credential POST, or `None` on timeout/cancel.
    pub async fn wait_for_credentials(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Credential>> {
        Ok(self.handoff.wait(timeout, cancel).await?)
    }

    /// Stop serving and clear the slot. Idempotent.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.serve_handle.take() {
            let _ = handle.await;
            info!(port = self.port, "Credential callback server stopped");
        }
        self.handoff.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_post_then_wait_roundtrip() {
        let mut server = CallbackServer::bind().await.unwrap();
        let url = format!("http://127.0.0.1:{}/credentials", server.port());

        let client = reqwest::Client::new();
        let response = client
            .post(&url)
            .json(&json!({"device_id": "34:5f:45:ec:b8:34", "jwt_token": "tok123"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let cancel = CancellationToken::new();
        let got = server
            .wait_for_credentials(Duration::from_secs(5), &cancel)
            .await
            .unwrap()
            .expect("credential expected");
        assert_eq!(got, Credential::new("34:5f:45:ec:b8:34", "tok123"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_frees_port() {
        let mut server = CallbackServer::bind().await.unwrap();
        let port = server.port();

        server.shutdown().await;
        server.shutdown().await;

        // Port must be reusable after shutdown.
        let listener = TcpListener::bind(("127.0.0.1", port)).await;
        assert!(listener.is_ok());
    }

    #[tokio::test]
    async fn test_fresh_session_does_not_see_old_credential() {
        let mut first = CallbackServer::bind().await.unwrap();
        first
            .handoff()
            .fill(&Credential::new("aa:bb", "old"))
            .await
            .unwrap();
        first.shutdown().await;

        let mut second = CallbackServer::bind().await.unwrap();
        let cancel = CancellationToken::new();
        let got = second
            .wait_for_credentials(Duration::from_millis(50), &cancel)
            .await
            .unwrap();
        assert!(got.is_none());
        second.shutdown().await;
    }
}
