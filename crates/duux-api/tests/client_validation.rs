//! Validation behavior against a local stand-in for the cloud API.

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use duux_api::{ApiError, DuuxClient, validate_credentials};

const GOOD_TOKEN: &str = "tok123";

async fn status_handler(
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if auth != format!("Bearer {}", GOOD_TOKEN) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid token"})),
        );
    }

    (
        StatusCode::OK,
        Json(json!({"data": {"device_id": device_id, "power": 1, "speed": 7}})),
    )
}

async fn command_handler(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    Json(json!({"echo": body["command"]}))
}

async fn spawn_api() -> String {
    let app = Router::new()
        .route("/data/{device_id}/status", get(status_handler))
        .route("/sensor/{device_id}/commands", post(command_handler));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn valid_credentials_produce_entry_title() {
    let base = spawn_api().await;
    let client = DuuxClient::with_base_url(&base, "34:5f:45:ec:b8:34", GOOD_TOKEN).unwrap();

    let device = validate_credentials(&client).await.unwrap();
    assert_eq!(device.title, "Duux Fan (34:5f:45:ec:b8:34)");
    assert_eq!(device.device_id, "34:5f:45:ec:b8:34");
}

#[tokio::test]
async fn rejected_token_maps_to_invalid_auth() {
    let base = spawn_api().await;
    let client = DuuxClient::with_base_url(&base, "34:5f:45:ec:b8:34", "wrong").unwrap();

    match validate_credentials(&client).await {
        Err(ApiError::InvalidAuth(_)) => {}
        other => panic!("expected InvalidAuth, got {:?}", other),
    }
}

#[tokio::test]
async fn unreachable_host_maps_to_cannot_connect() {
    // Bind a port and drop it so nothing is listening there.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client =
        DuuxClient::with_base_url(format!("http://{}", addr), "aa:bb", "tok").unwrap();
    match validate_credentials(&client).await {
        Err(ApiError::CannotConnect(_)) => {}
        other => panic!("expected CannotConnect, got {:?}", other),
    }
}

#[tokio::test]
async fn status_payload_exposes_data_object() {
    let base = spawn_api().await;
    let client = DuuxClient::with_base_url(&base, "aa:bb:cc", GOOD_TOKEN).unwrap();

    let status = client.get_status().await.unwrap();
    assert_eq!(status.data["power"], 1);
    assert_eq!(status.data["speed"], 7);
}

#[tokio::test]
async fn commands_use_text_form() {
    let base = spawn_api().await;
    let client = DuuxClient::with_base_url(&base, "aa:bb:cc", GOOD_TOKEN).unwrap();

    let echoed = client.send_command("tune set speed 12").await.unwrap();
    assert_eq!(echoed["echo"], "tune set speed 12");

    // Convenience commands encode the same text form.
    client.turn_on().await.unwrap();
    client.set_oscillation(true).await.unwrap();
    client.set_night_mode(false).await.unwrap();
}
