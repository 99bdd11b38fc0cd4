//! Intercepting-proxy process lifecycle.
//!
//! The manager owns the proxy child process and the hand-off storage
//! exclusively: it is the only component that spawns, terminates, or
//! clears either. At most one session is active per manager.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::addon::materialize_addon_script;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::handoff::{FileHandoff, Handoff};
use crate::matcher::Credential;
use crate::ports::resolve_port;

/// Proxy settings to show the user configuring their device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    /// TLS interception means the upstream certificate cannot verify.
    pub ssl_verify: bool,
}

struct ProxySession {
    port: u16,
    child: Child,
}

/// Manages the intercepting-proxy process for credential capture.
pub struct ProxyManager {
    config: CaptureConfig,
    handoff: Arc<dyn Handoff>,
    session: Mutex<Option<ProxySession>>,
}

impl ProxyManager {
    /// Manager with the file-based hand-off from the config, for the
    /// out-of-process capture addon.
    pub fn new(config: CaptureConfig) -> Self {
        let handoff = Arc::new(
            FileHandoff::new(&config.handoff_path).with_poll_interval(config.poll_interval()),
        );
        Self::with_handoff(config, handoff)
    }

    /// Manager with an explicit hand-off channel.
    pub fn with_handoff(config: CaptureConfig, handoff: Arc<dyn Handoff>) -> Self {
        Self {
            config,
            handoff,
            session: Mutex::new(None),
        }
    }

    /// The hand-off channel this manager clears between sessions.
    pub fn handoff(&self) -> Arc<dyn Handoff> {
        self.handoff.clone()
    }

    /// Start a capture session and return the proxy's listen port.
    ///
    /// Fails with [`CaptureError::AlreadyRunning`] if a session is
    /// active, and with [`CaptureError::ProxyStart`] (carrying captured
    /// stderr) if the proxy exits during the startup grace period.
    pub async fn start(&self) -> Result<u16> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        let port = resolve_port(self.config.requested_port).await?;

        // Stale state from an earlier session must not satisfy this one.
        self.handoff.clear().await;

        let addon_script = match &self.config.addon_script {
            Some(path) => path.clone(),
            None => materialize_addon_script().await?,
        };

        let mut cmd = Command::new(&self.config.proxy_program);
        cmd.arg("--listen-port")
            .arg(port.to_string())
            .arg("--set")
            .arg("confdir=~/.mitmproxy")
            .arg("--set")
            .arg("ssl_insecure=true")
            .arg("--scripts")
            .arg(&addon_script)
            .env("DUUX_CREDENTIALS_FILE", &self.config.handoff_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(CaptureError::Spawn)?;

        // Give the proxy a moment to bind; an early exit is a start failure.
        tokio::time::sleep(self.config.startup_grace()).await;

        match child.try_wait() {
            Ok(Some(status)) => {
                let stderr = read_stderr(&mut child).await;
                warn!(%status, "Proxy exited during startup grace period");
                self.handoff.clear().await;
                return Err(CaptureError::ProxyStart { stderr });
            }
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill().await;
                self.handoff.clear().await;
                return Err(CaptureError::Spawn(e));
            }
        }

        info!(port, program = %self.config.proxy_program, "Started intercepting proxy");
        *session = Some(ProxySession { port, child });
        Ok(port)
    }

    /// Tear down the session. Idempotent; never errors.
    ///
    /// Sends a graceful termination signal, waits up to the shutdown
    /// grace period, then force-kills. The hand-off state is cleared
    /// afterward regardless of how the process exited.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        if let Some(mut active) = session.take() {
            terminate(&active.child);

            match timeout(self.config.shutdown_grace(), active.child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "Proxy exited"),
                Ok(Err(e)) => warn!(error = %e, "Error waiting for proxy exit"),
                Err(_) => {
                    warn!("Proxy did not exit gracefully, force killing");
                    if let Err(e) = active.child.kill().await {
                        warn!(error = %e, "Force kill failed");
                    }
                }
            }
            info!(port = active.port, "Stopped intercepting proxy");
        }

        self.handoff.clear().await;
    }

    /// Wait for a captured credential, or `None` on timeout/cancel.
    pub async fn wait_for_credentials(
        &self,
        wait_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Credential>> {
        self.handoff.wait(wait_timeout, cancel).await
    }

    /// Wait with the configured capture timeout.
    pub async fn wait_for_credentials_default(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Credential>> {
        self.wait_for_credentials(self.config.capture_timeout(), cancel)
            .await
    }

    /// Proxy settings to display to the user.
    pub async fn proxy_endpoint(&self) -> Result<ProxyEndpoint> {
        let session = self.session.lock().await;
        let active = session.as_ref().ok_or(CaptureError::NotRunning)?;
        Ok(ProxyEndpoint {
            host: "127.0.0.1".to_string(),
            port: active.port,
            ssl_verify: false,
        })
    }

    /// Whether a capture session is active.
    pub async fn is_running(&self) -> bool {
        self.session.lock().await.is_some()
    }
}

async fn read_stderr(child: &mut Child) -> String {
    let mut buf = Vec::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_end(&mut buf).await;
    }
    if buf.is_empty() {
        "Unknown error".to_string()
    } else {
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Ask the child to exit gracefully. On unix this is SIGTERM; elsewhere
/// the best available is an immediate kill.
fn terminate(child: &Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // Safety: plain kill(2) on a pid we own.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        return;
    }

    #[cfg(not(unix))]
    {
        let _ = child;
    }
}
