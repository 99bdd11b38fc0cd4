//! Credential-receiving route.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{Method, StatusCode, header};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use duux_capture::{CaptureError, Credential, Handoff, MemoryHandoff};

/// State shared with the credential handler.
#[derive(Clone)]
pub struct AppState {
    /// Slot the handler fills; the waiting flow consumes it.
    pub handoff: Arc<MemoryHandoff>,
}

/// JSON envelope for all responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub status: String,
    pub message: String,
}

impl StatusEnvelope {
    fn success(message: &str) -> Self {
        Self {
            status: "success".to_string(),
            message: message.to_string(),
        }
    }

    fn error(message: &str) -> Self {
        Self {
            status: "error".to_string(),
            message: message.to_string(),
        }
    }
}

/// `POST /credentials` — receive a captured credential from the
/// extraction script.
///
/// Malformed JSON and missing/empty fields answer 400 and leave the slot
/// untouched; the session keeps waiting. A duplicate POST after a fill
/// still answers 200 but does not overwrite (first-writer-wins).
pub async fn receive_credentials(
    State(state): State<AppState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> (StatusCode, Json<StatusEnvelope>) {
    let Json(value) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            debug!(error = %rejection, "Rejected malformed credential payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(StatusEnvelope::error("Invalid JSON")),
            );
        }
    };

    let device_id = value.get("device_id").and_then(|v| v.as_str()).unwrap_or("");
    let jwt_token = value.get("jwt_token").and_then(|v| v.as_str()).unwrap_or("");

    if device_id.is_empty() || jwt_token.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(StatusEnvelope::error("Missing credentials")),
        );
    }

    match state
        .handoff
        .fill(&Credential::new(device_id, jwt_token))
        .await
    {
        Ok(true) => info!("Received credentials from extraction script"),
        Ok(false) => debug!("Credentials already received, ignoring duplicate"),
        Err(CaptureError::MalformedCredential(msg)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(StatusEnvelope::error(&msg)),
            );
        }
        Err(e) => {
            warn!(error = %e, "Error storing received credentials");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusEnvelope::error(&e.to_string())),
            );
        }
    }

    (
        StatusCode::OK,
        Json(StatusEnvelope::success("Credentials received")),
    )
}

/// Build the callback router: `POST /credentials` plus permissive CORS
/// (the extraction script may push from a browser context).
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/credentials", post(receive_credentials))
        .layer(cors)
        .with_state(state)
}
