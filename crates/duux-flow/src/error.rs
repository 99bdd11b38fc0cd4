//! Error types for the setup flow.

use crate::flow::FlowState;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors that can occur while driving the setup flow.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The requested operation is not valid in the current state.
    #[error("'{action}' is not valid in state {state:?}")]
    InvalidTransition {
        state: FlowState,
        action: &'static str,
    },

    /// Capture subsystem failure.
    #[error(transparent)]
    Capture(#[from] duux_capture::CaptureError),
}
