//! HTTP client for the Duux cloud fan API.
//!
//! The API is a thin REST surface: one status endpoint and one command
//! endpoint, both authenticated with a bearer token captured during setup.
//! Commands are plain text in the form `tune set <param> <value>`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ApiError, Result};

/// Production base URL for the Duux cloud API.
pub const API_BASE_URL: &str = "https://v5.api.cloudgarden.nl";

/// Minimum fan speed accepted by the device.
pub const MIN_FAN_SPEED: u8 = 1;
/// Maximum fan speed accepted by the device.
pub const MAX_FAN_SPEED: u8 = 30;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Device status payload: `{"data": {...}}`.
///
/// The inner fields vary by firmware; callers pick what they need out of
/// the raw JSON value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    command: &'a str,
}

/// Result of a successful credential validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedDevice {
    /// Display title for the configured entry, e.g. `Duux Fan (aa:bb:..)`.
    pub title: String,
    pub device_id: String,
}

/// Client bound to one device and one bearer token.
#[derive(Debug, Clone)]
pub struct DuuxClient {
    http: reqwest::Client,
    base_url: String,
    device_id: String,
    bearer_token: String,
}

impl DuuxClient {
    /// Create a client against the production API.
    pub fn new(device_id: impl Into<String>, bearer_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(API_BASE_URL, device_id, bearer_token)
    }

    /// Create a client against an alternate base URL (tests, staging).
    pub fn with_base_url(
        base_url: impl Into<String>,
        device_id: impl Into<String>,
        bearer_token: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::CannotConnect(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device_id: device_id.into(),
            bearer_token: bearer_token.into(),
        })
    }

    /// Device identifier this client is bound to.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Host portion of the base URL, sent as an explicit `Host` header.
    ///
    /// The Duux backend routes on `Host` and rejects requests without it.
    fn host_header(&self) -> String {
        self.base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string()
    }

    /// Fetch the current device status.
    pub async fn get_status(&self) -> Result<StatusResponse> {
        let url = format!("{}/data/{}/status", self.base_url, self.device_id);
        debug!(device_id = %self.device_id, "Fetching device status");

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.bearer_token))
            .header("Host", self.host_header())
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::InvalidAuth(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<StatusResponse>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Send a text command to the device.
    ///
    /// The command format is `tune set <param> <value>`; the convenience
    /// methods below cover the known parameters.
    pub async fn send_command(&self, command: &str) -> Result<serde_json::Value> {
        let url = format!("{}/sensor/{}/commands", self.base_url, self.device_id);
        debug!(device_id = %self.device_id, command, "Sending device command");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.bearer_token))
            .header("Host", self.host_header())
            .json(&CommandRequest { command })
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::InvalidAuth(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Turn the fan on.
    pub async fn turn_on(&self) -> Result<()> {
        self.send_command("tune set power 1").await.map(|_| ())
    }

    /// Turn the fan off.
    pub async fn turn_off(&self) -> Result<()> {
        self.send_command("tune set power 0").await.map(|_| ())
    }

    /// Set the fan speed (1..=30).
    pub async fn set_speed(&self, speed: u8) -> Result<()> {
        if !(MIN_FAN_SPEED..=MAX_FAN_SPEED).contains(&speed) {
            return Err(ApiError::InvalidSpeed(speed));
        }
        self.send_command(&format!("tune set speed {}", speed))
            .await
            .map(|_| ())
    }

    /// Enable or disable horizontal oscillation.
    pub async fn set_oscillation(&self, oscillate: bool) -> Result<()> {
        self.send_command(&format!("tune set horosc {}", oscillate as u8))
            .await
            .map(|_| ())
    }

    /// Enable or disable night mode.
    pub async fn set_night_mode(&self, night_mode: bool) -> Result<()> {
        self.send_command(&format!("tune set night {}", night_mode as u8))
            .await
            .map(|_| ())
    }
}

/// Check that a captured or manually-entered credential can reach the
/// device, returning the entry title on success.
///
/// `InvalidAuth` and `CannotConnect` are both recoverable — the setup
/// flow routes them back to a re-entry step.
pub async fn validate_credentials(client: &DuuxClient) -> Result<ValidatedDevice> {
    client.get_status().await?;
    Ok(ValidatedDevice {
        title: format!("Duux Fan ({})", client.device_id()),
        device_id: client.device_id().to_string(),
    })
}
