//! Capture configuration.
//!
//! Loaded from `<config dir>/duux/capture.toml` when present; every field
//! has a default so a missing file just means defaults:
//!
//! ```toml
//! proxy_program = "mitmdump"
//! startup_grace_secs = 3
//! shutdown_grace_secs = 5
//! poll_interval_secs = 1
//! capture_timeout_secs = 300
//! handoff_path = "/tmp/duux_credentials.json"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};
use crate::handoff::default_handoff_path;

/// Configuration for a capture session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Intercepting-proxy executable.
    pub proxy_program: String,

    /// Preferred listen port. Falls back to an ephemeral port when taken
    /// or unset.
    pub requested_port: Option<u16>,

    /// Capture-addon script attached to the proxy. `None` uses the
    /// embedded addon, materialized to a temp path at start.
    pub addon_script: Option<PathBuf>,

    /// How long to let the proxy stabilize before checking it is alive.
    pub startup_grace_secs: u64,

    /// How long to wait for graceful exit before force-killing.
    pub shutdown_grace_secs: u64,

    /// Hand-off polling interval.
    pub poll_interval_secs: u64,

    /// Upper bound on waiting for a capture.
    pub capture_timeout_secs: u64,

    /// Marker-file location for the cross-process hand-off.
    pub handoff_path: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            proxy_program: "mitmdump".to_string(),
            requested_port: None,
            addon_script: None,
            startup_grace_secs: 3,
            shutdown_grace_secs: 5,
            poll_interval_secs: 1,
            capture_timeout_secs: 300,
            handoff_path: default_handoff_path(),
        }
    }
}

impl CaptureConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| CaptureError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("duux").join("capture.toml"))
    }

    /// Load from the default location. A missing file yields defaults;
    /// a malformed file is an error.
    pub fn load() -> Result<Self> {
        let Some(path) = Self::default_path() else {
            return Ok(Self::default());
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(CaptureError::Config(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
