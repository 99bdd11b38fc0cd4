//! Request inspection for the traffic-capture addon.
//!
//! The addon is purely observational: it looks at each proxied request,
//! and when the request targets the Duux status endpoint with a bearer
//! token attached, it extracts the device identifier and token. It never
//! modifies or drops the request.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Host of the Duux cloud API as seen by the mobile app.
pub const DUUX_API_HOST: &str = "v5.api.cloudgarden.nl";

/// Matches `/data/{device_id}/status` where the device id is a
/// colon-separated hex sequence (a MAC-like identifier).
static DEVICE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/data/([0-9a-fA-F:]+)/status").unwrap());

const BEARER_PREFIX: &str = "Bearer ";

/// A captured device credential. Immutable once created.
///
/// The wire name for the token is `jwt_token`, matching the payload the
/// extraction script and callback endpoint exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub device_id: String,
    #[serde(rename = "jwt_token")]
    pub bearer_token: String,
}

impl Credential {
    pub fn new(device_id: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            bearer_token: bearer_token.into(),
        }
    }

    /// A credential is usable only with both fields non-empty.
    pub fn is_valid(&self) -> bool {
        !self.device_id.is_empty() && !self.bearer_token.is_empty()
    }

    /// Token shortened for log output. Truncates by characters; the
    /// token is opaque and may contain multibyte text.
    pub fn redacted_token(&self) -> String {
        if self.bearer_token.chars().count() > 20 {
            let head: String = self.bearer_token.chars().take(20).collect();
            format!("{}...", head)
        } else {
            self.bearer_token.clone()
        }
    }
}

/// Matches intercepted requests against the Duux status endpoint.
#[derive(Debug, Clone)]
pub struct CaptureMatcher {
    host: String,
}

impl Default for CaptureMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureMatcher {
    /// Matcher for the production API host.
    pub fn new() -> Self {
        Self::with_host(DUUX_API_HOST)
    }

    /// Matcher for an alternate host (tests).
    pub fn with_host(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Inspect one intercepted request.
    ///
    /// Returns a credential when the host matches (case-insensitively —
    /// host names are case-insensitive on the wire), the `Authorization`
    /// header carries a `Bearer ` token, and the path is the device
    /// status endpoint. Anything else is ignored with no side effect.
    pub fn inspect(
        &self,
        host: &str,
        path: &str,
        authorization: Option<&str>,
    ) -> Option<Credential> {
        if !host.eq_ignore_ascii_case(&self.host) {
            return None;
        }

        let token = authorization?.strip_prefix(BEARER_PREFIX)?;
        if token.is_empty() {
            return None;
        }

        let captures = DEVICE_ID_PATTERN.captures(path)?;
        let device_id = captures.get(1)?.as_str();

        let credential = Credential::new(device_id, token);
        debug!(
            device_id = %credential.device_id,
            token = %credential.redacted_token(),
            "Captured Duux credentials"
        );
        Some(credential)
    }
}
