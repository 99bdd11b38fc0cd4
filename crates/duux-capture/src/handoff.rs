//! Credential hand-off between the capture context and the waiting flow.
//!
//! A hand-off slot is single-assignment and single-consumer: it goes
//! `empty -> filled` at most once per session, then gets cleared for the
//! next session. Fills are first-writer-wins; a second capture within the
//! same session is a no-op. Two interchangeable implementations:
//!
//! - [`MemoryHandoff`] when capture and consumer share an address space
//!   (the loopback callback server, tests);
//! - [`FileHandoff`] when the capture side is a separate OS process (the
//!   mitmproxy addon writing a JSON marker file).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CaptureError, Result};
use crate::matcher::Credential;

/// Default marker-file location for cross-process hand-off.
pub fn default_handoff_path() -> PathBuf {
    std::env::temp_dir().join("duux_credentials.json")
}

/// The hand-off contract: `fill`, `wait`, `clear`.
#[async_trait]
pub trait Handoff: Send + Sync {
    /// Commit a credential. Returns `true` if this write filled the slot,
    /// `false` if the slot was already filled (first-writer-wins).
    ///
    /// Credentials with empty fields are rejected with
    /// [`CaptureError::MalformedCredential`] and never fill the slot.
    async fn fill(&self, credential: &Credential) -> Result<bool>;

    /// Suspend until the slot is filled or `timeout` elapses, returning
    /// `None` on timeout or cancellation. Polling implementations check
    /// at most once per second; cancellation is observed within one
    /// polling interval.
    async fn wait(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Credential>>;

    /// Reset the slot for the next session. Idempotent; already-clean
    /// state is a no-op, never an error.
    async fn clear(&self);
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory variant
// ─────────────────────────────────────────────────────────────────────────────

/// Single-slot in-process hand-off: a mutex-guarded slot plus a notify
/// handle for waiters.
#[derive(Default)]
pub struct MemoryHandoff {
    slot: Mutex<Option<Credential>>,
    notify: Notify,
}

impl MemoryHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, as handed to the callback server state.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Non-blocking peek at the slot.
    pub fn peek(&self) -> Option<Credential> {
        self.slot.lock().clone()
    }
}

#[async_trait]
impl Handoff for MemoryHandoff {
    async fn fill(&self, credential: &Credential) -> Result<bool> {
        if !credential.is_valid() {
            return Err(CaptureError::MalformedCredential(
                "device_id and jwt_token must be non-empty".to_string(),
            ));
        }

        let mut slot = self.slot.lock();
        if slot.is_some() {
            debug!("Hand-off slot already filled, ignoring subsequent capture");
            return Ok(false);
        }
        *slot = Some(credential.clone());
        drop(slot);

        self.notify.notify_waiters();
        info!(device_id = %credential.device_id, "Credential committed to hand-off slot");
        Ok(true)
    }

    async fn wait(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Credential>> {
        let deadline = Instant::now() + timeout;
        loop {
            // A Notified future only registers as a waiter once polled
            // (or explicitly enabled); enable it before checking the slot
            // so a fill between the check and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(credential) = self.slot.lock().clone() {
                return Ok(Some(credential));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => {
                    debug!("Hand-off wait cancelled");
                    return Ok(None);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!("Timeout waiting for credentials");
                    return Ok(None);
                }
            }
        }
    }

    async fn clear(&self) {
        *self.slot.lock() = None;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File-marker variant
// ─────────────────────────────────────────────────────────────────────────────

/// Cross-process hand-off through a JSON marker file.
///
/// The capture side (the proxy addon, a separate OS process) writes the
/// file; the flow polls for it. A partially-written or unparseable file
/// counts as "not yet filled", never as an error.
pub struct FileHandoff {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileHandoff {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Override the polling interval (tests).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_slot(&self) -> Option<Credential> {
        let bytes = tokio::fs::read(&self.path).await.ok()?;
        match serde_json::from_slice::<Credential>(&bytes) {
            Ok(credential) if credential.is_valid() => Some(credential),
            Ok(_) => {
                debug!("Marker file present but credential incomplete, still waiting");
                None
            }
            Err(e) => {
                // Likely a partial write from the capture side; retry on
                // the next poll.
                debug!(error = %e, "Marker file not yet parseable");
                None
            }
        }
    }
}

#[async_trait]
impl Handoff for FileHandoff {
    async fn fill(&self, credential: &Credential) -> Result<bool> {
        if !credential.is_valid() {
            return Err(CaptureError::MalformedCredential(
                "device_id and jwt_token must be non-empty".to_string(),
            ));
        }

        // create_new makes first-writer-wins hold across processes.
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await;

        let mut file = match file {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %self.path.display(), "Marker file already present, ignoring");
                return Ok(false);
            }
            Err(e) => return Err(CaptureError::Handoff(e)),
        };

        let payload =
            serde_json::to_vec(credential).map_err(|e| CaptureError::MalformedCredential(e.to_string()))?;
        file.write_all(&payload)
            .await
            .map_err(CaptureError::Handoff)?;
        file.flush().await.map_err(CaptureError::Handoff)?;

        info!(path = %self.path.display(), "Credentials saved to marker file");
        Ok(true)
    }

    async fn wait(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Credential>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(credential) = self.read_slot().await {
                info!("Successfully captured credentials");
                return Ok(Some(credential));
            }

            if Instant::now() >= deadline {
                warn!("Timeout waiting for credentials");
                return Ok(None);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => {
                    debug!("Hand-off wait cancelled");
                    return Ok(None);
                }
            }
        }
    }

    async fn clear(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to clean up marker file");
            }
        }
    }
}
