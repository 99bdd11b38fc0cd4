//! Error types for the callback server.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, CallbackError>;

/// Errors that can occur in the loopback callback server.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// Could not bind the loopback listener.
    #[error("Failed to bind callback listener: {0}")]
    Bind(#[source] std::io::Error),

    /// Hand-off layer failure.
    #[error(transparent)]
    Capture(#[from] duux_capture::CaptureError),
}
