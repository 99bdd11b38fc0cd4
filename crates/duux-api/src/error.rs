//! Error types for the Duux API client.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors that can occur when talking to the Duux cloud API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The bearer token was rejected (401/403).
    #[error("Invalid authentication: {0}")]
    InvalidAuth(String),

    /// Transport-level failure: DNS, TCP, TLS, or timeout.
    #[error("Cannot connect to Duux API: {0}")]
    CannotConnect(String),

    /// The API answered with a non-success status outside the auth range.
    #[error("Duux API error (status {status}): {body}")]
    Backend { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("Unexpected response from Duux API: {0}")]
    InvalidResponse(String),

    /// Fan speed outside the 1..=30 range.
    #[error("Invalid fan speed {0}, expected 1..=30")]
    InvalidSpeed(u8),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            ApiError::CannotConnect(e.to_string())
        } else if e.is_decode() {
            ApiError::InvalidResponse(e.to_string())
        } else {
            ApiError::CannotConnect(e.to_string())
        }
    }
}
