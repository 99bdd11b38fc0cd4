//! The interactive setup-flow state machine.
//!
//! ```text
//! ChoosingMethod ──automated──▶ AwaitingProxySetup ──confirmed──▶ AwaitingCapture
//!       │                             ▲                                │
//!       │ manual                      └──────timeout (retry offer)─────┤
//!       ▼                                                              ▼
//!  ManualEntry ────submit────▶ Validating ──ok──▶ Done        credential received
//!       ▲                          │                                   │
//!       └──────invalid_auth────────┘◀──────────────────────────────────┘
//! ```
//!
//! Cancellation in any waiting state tears the proxy down and lands in
//! `Aborted`. Teardown runs exactly once per capture session, on every
//! exit path.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use duux_api::{ApiError, DuuxClient, validate_credentials};
use duux_capture::{CaptureConfig, Credential, Handoff, ProxyEndpoint, ProxyManager};

use crate::error::{FlowError, Result};

/// Current step of the interactive flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    ChoosingMethod,
    ManualEntry,
    AwaitingProxySetup,
    AwaitingCapture,
    Validating,
    Done,
    Aborted,
}

/// How the user wants to obtain credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupMethod {
    Automated,
    Manual,
}

/// Error annotation shown on a re-entry form, by wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidAuth,
    CannotConnect,
    AlreadyConfigured,
    ProxyStartFailed,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidAuth => "invalid_auth",
            ErrorCode::CannotConnect => "cannot_connect",
            ErrorCode::AlreadyConfigured => "already_configured",
            ErrorCode::ProxyStartFailed => "proxy_start_failed",
            ErrorCode::Unknown => "unknown",
        }
    }
}

/// The finished entry: what the host platform persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupEntry {
    /// Display title, e.g. `Duux Fan (34:5f:45:ec:b8:34)`.
    pub title: String,
    pub credential: Credential,
}

/// What the flow asks the caller to do next.
#[derive(Debug)]
pub enum FlowEvent {
    /// Show the manual device-id/token form.
    ManualForm,
    /// Show the proxy settings; user configures their phone and confirms.
    ProxySetupReady(ProxyEndpoint),
    /// No credential arrived in time; offer a retry or abort.
    CaptureTimedOut,
    /// Setup finished.
    Completed(SetupEntry),
    /// Validation or startup failed; show the re-entry form annotated
    /// with `code`.
    FormError { code: ErrorCode },
    /// The flow was cancelled and torn down.
    Aborted,
}

/// Predicate the host supplies to reject devices that are already set up.
pub type AlreadyConfigured = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Flow configuration.
#[derive(Clone)]
pub struct FlowConfig {
    /// Capture subsystem settings.
    pub capture: CaptureConfig,
    /// Base URL used for credential validation.
    pub api_base_url: String,
    /// Host-supplied duplicate-device guard.
    pub already_configured: Option<AlreadyConfigured>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            api_base_url: duux_api::API_BASE_URL.to_string(),
            already_configured: None,
        }
    }
}

/// One setup attempt. Owns at most one active capture session.
pub struct SetupFlow {
    config: FlowConfig,
    state: FlowState,
    manager: Option<ProxyManager>,
    handoff_override: Option<Arc<dyn Handoff>>,
    cancel: CancellationToken,
}

impl SetupFlow {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            state: FlowState::ChoosingMethod,
            manager: None,
            handoff_override: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an explicit hand-off channel instead of the file marker
    /// (e.g. the callback server's slot).
    pub fn with_handoff(mut self, handoff: Arc<dyn Handoff>) -> Self {
        self.handoff_override = Some(handoff);
        self
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Token observers can use to cancel a wait in progress. Cancellation
    /// is noticed within one polling interval.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// First step: pick automated capture or manual entry.
    pub async fn choose_method(&mut self, method: SetupMethod) -> Result<FlowEvent> {
        self.expect_state(FlowState::ChoosingMethod, "choose_method")?;
        match method {
            SetupMethod::Manual => {
                self.state = FlowState::ManualEntry;
                Ok(FlowEvent::ManualForm)
            }
            SetupMethod::Automated => self.start_capture().await,
        }
    }

    /// Retry automated capture after a timeout or start failure.
    pub async fn retry_capture(&mut self) -> Result<FlowEvent> {
        self.expect_state(FlowState::AwaitingProxySetup, "retry_capture")?;
        self.start_capture().await
    }

    async fn start_capture(&mut self) -> Result<FlowEvent> {
        let manager = match &self.handoff_override {
            Some(handoff) => {
                ProxyManager::with_handoff(self.config.capture.clone(), handoff.clone())
            }
            None => ProxyManager::new(self.config.capture.clone()),
        };

        match manager.start().await {
            Ok(port) => {
                info!(port, "Capture session started");
                let endpoint = manager.proxy_endpoint().await?;
                self.manager = Some(manager);
                self.state = FlowState::AwaitingProxySetup;
                Ok(FlowEvent::ProxySetupReady(endpoint))
            }
            Err(e) => {
                warn!(error = %e, "Failed to start capture session");
                // start() already tore down its partial state; nothing to stop.
                self.state = FlowState::AwaitingProxySetup;
                Ok(FlowEvent::FormError {
                    code: ErrorCode::ProxyStartFailed,
                })
            }
        }
    }

    /// The user confirmed their device routes through the proxy: wait for
    /// a capture, then validate it.
    ///
    /// Every exit — credential, timeout, cancellation — tears the capture
    /// session down exactly once before returning.
    pub async fn confirm_proxy_configured(&mut self) -> Result<FlowEvent> {
        self.expect_state(FlowState::AwaitingProxySetup, "confirm_proxy_configured")?;
        let Some(manager) = self.manager.as_ref() else {
            return Err(FlowError::InvalidTransition {
                state: self.state,
                action: "confirm_proxy_configured",
            });
        };

        self.state = FlowState::AwaitingCapture;
        let captured = manager
            .wait_for_credentials_default(&self.cancel)
            .await;

        // Single teardown point for this session, on every path below.
        self.teardown().await;

        if self.cancel.is_cancelled() {
            self.state = FlowState::Aborted;
            return Ok(FlowEvent::Aborted);
        }

        match captured? {
            Some(credential) => self.validate(credential).await,
            None => {
                info!("No credentials captured before timeout");
                self.state = FlowState::AwaitingProxySetup;
                Ok(FlowEvent::CaptureTimedOut)
            }
        }
    }

    /// Manual entry submission.
    pub async fn submit_manual(
        &mut self,
        device_id: impl Into<String>,
        bearer_token: impl Into<String>,
    ) -> Result<FlowEvent> {
        self.expect_state(FlowState::ManualEntry, "submit_manual")?;
        self.validate(Credential::new(device_id, bearer_token))
            .await
    }

    /// Abort the flow, tearing down any active capture session.
    pub async fn cancel(&mut self) -> FlowEvent {
        self.cancel.cancel();
        self.teardown().await;
        self.state = FlowState::Aborted;
        FlowEvent::Aborted
    }

    async fn validate(&mut self, credential: Credential) -> Result<FlowEvent> {
        self.state = FlowState::Validating;

        if let Some(guard) = &self.config.already_configured {
            if guard(&credential.device_id) {
                self.state = FlowState::Aborted;
                return Ok(FlowEvent::FormError {
                    code: ErrorCode::AlreadyConfigured,
                });
            }
        }

        let client = match DuuxClient::with_base_url(
            self.config.api_base_url.as_str(),
            credential.device_id.as_str(),
            credential.bearer_token.as_str(),
        ) {
            Ok(client) => client,
            Err(e) => return Ok(self.validation_failed(e)),
        };

        match validate_credentials(&client).await {
            Ok(device) => {
                info!(device_id = %device.device_id, "Setup complete");
                self.state = FlowState::Done;
                Ok(FlowEvent::Completed(SetupEntry {
                    title: device.title,
                    credential,
                }))
            }
            Err(e) => Ok(self.validation_failed(e)),
        }
    }

    /// Validation failures are recoverable: route back to the entry form
    /// with an error annotation, never crash the flow.
    fn validation_failed(&mut self, error: ApiError) -> FlowEvent {
        let code = match &error {
            ApiError::InvalidAuth(_) => ErrorCode::InvalidAuth,
            ApiError::CannotConnect(_) => ErrorCode::CannotConnect,
            _ => ErrorCode::Unknown,
        };
        warn!(error = %error, code = code.as_str(), "Credential validation failed");
        self.state = FlowState::ManualEntry;
        FlowEvent::FormError { code }
    }

    async fn teardown(&mut self) {
        if let Some(manager) = self.manager.take() {
            manager.stop().await;
        }
    }

    fn expect_state(&self, expected: FlowState, action: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(FlowError::InvalidTransition {
                state: self.state,
                action,
            });
        }
        Ok(())
    }
}
