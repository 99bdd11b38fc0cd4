//! Staging of the embedded capture-addon script.
//!
//! The intercepting proxy runs the addon in its own process; the Rust
//! side only decides which detection rules the addon applies (see
//! [`crate::matcher`], which mirrors them) and where the marker file
//! lands (the `DUUX_CREDENTIALS_FILE` environment variable).

use std::path::PathBuf;

use crate::error::{CaptureError, Result};

const ADDON_SOURCE: &str = include_str!("../assets/proxy_addon.py");

/// Write the embedded addon script to a well-known temp path and return
/// it, for attaching to the proxy via `--scripts`.
pub async fn materialize_addon_script() -> Result<PathBuf> {
    let path = std::env::temp_dir().join("duux_proxy_addon.py");
    tokio::fs::write(&path, ADDON_SOURCE)
        .await
        .map_err(CaptureError::AddonScript)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_materialized_script_carries_detection_rules() {
        let path = materialize_addon_script().await.unwrap();
        let source = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(source.contains("v5.api.cloudgarden.nl"));
        assert!(source.contains("DUUX_CREDENTIALS_FILE"));
        assert!(source.contains("/data/([0-9a-fA-F:]+)/status"));
    }
}
