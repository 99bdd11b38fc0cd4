//! REST client for the Duux cloud fan API.
//!
//! Two endpoints, both bearer-authenticated:
//!
//! - `GET /data/{device_id}/status` — current device state
//! - `POST /sensor/{device_id}/commands` — text commands
//!   (`tune set <param> <value>`)
//!
//! The setup flow uses [`validate_credentials`] to confirm a captured
//! credential actually reaches the device before finishing.

pub mod client;
pub mod error;

pub use client::{
    API_BASE_URL, DuuxClient, MAX_FAN_SPEED, MIN_FAN_SPEED, StatusResponse, ValidatedDevice,
    validate_credentials,
};
pub use error::{ApiError, Result};
