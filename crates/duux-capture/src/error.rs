//! Error types for the capture kernel.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Errors that can occur during credential capture.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// A capture session is already active.
    #[error("Proxy is already running")]
    AlreadyRunning,

    /// No active capture session.
    #[error("Proxy is not running")]
    NotRunning,

    /// Could not bind an ephemeral port. Transient; retry allocates a
    /// fresh port.
    #[error("Port allocation failed: {0}")]
    PortAllocation(#[source] std::io::Error),

    /// The proxy executable could not be spawned at all.
    #[error("Failed to spawn proxy process: {0}")]
    Spawn(#[source] std::io::Error),

    /// The proxy process exited during the startup grace period.
    #[error("Failed to start proxy: {stderr}")]
    ProxyStart { stderr: String },

    /// The embedded addon script could not be staged to disk.
    #[error("Failed to write addon script: {0}")]
    AddonScript(#[source] std::io::Error),

    /// Hand-off storage failure (marker file unwritable etc.).
    #[error("Hand-off error: {0}")]
    Handoff(#[source] std::io::Error),

    /// A payload reached the hand-off boundary with missing or empty
    /// fields. The session keeps waiting.
    #[error("Malformed credential: {0}")]
    MalformedCredential(String),

    /// Configuration file problem.
    #[error("Config error: {0}")]
    Config(String),
}
