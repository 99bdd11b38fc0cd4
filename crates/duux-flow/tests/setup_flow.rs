//! End-to-end flow tests with a stub proxy and a local stand-in API.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path as AxumPath;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use duux_capture::{CaptureConfig, Credential, Handoff, MemoryHandoff};
use duux_flow::{ErrorCode, FlowConfig, FlowEvent, FlowState, SetupFlow, SetupMethod};

const GOOD_TOKEN: &str = "tok123";

async fn status_handler(
    AxumPath(device_id): AxumPath<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if auth != format!("Bearer {}", GOOD_TOKEN) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "nope"})));
    }
    (StatusCode::OK, Json(json!({"data": {"device_id": device_id}})))
}

async fn spawn_api() -> String {
    let app = Router::new().route("/data/{device_id}/status", get(status_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn write_stub_proxy(dir: &Path) -> PathBuf {
    let path = dir.join("proxy");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 60\n").unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn flow_config(dir: &Path, api_base_url: String, timeout_secs: u64) -> FlowConfig {
    FlowConfig {
        capture: CaptureConfig {
            proxy_program: write_stub_proxy(dir).to_string_lossy().into_owned(),
            startup_grace_secs: 0,
            shutdown_grace_secs: 1,
            capture_timeout_secs: timeout_secs,
            handoff_path: dir.join("creds.json"),
            ..CaptureConfig::default()
        },
        api_base_url,
        already_configured: None,
    }
}

#[tokio::test]
async fn manual_entry_with_valid_credentials_completes() {
    let base = spawn_api().await;
    let mut flow = SetupFlow::new(FlowConfig {
        api_base_url: base,
        ..FlowConfig::default()
    });

    flow.choose_method(SetupMethod::Manual).await.unwrap();
    let event = flow
        .submit_manual("34:5f:45:ec:b8:34", GOOD_TOKEN)
        .await
        .unwrap();

    match event {
        FlowEvent::Completed(entry) => {
            assert_eq!(entry.title, "Duux Fan (34:5f:45:ec:b8:34)");
            assert_eq!(
                entry.credential,
                Credential::new("34:5f:45:ec:b8:34", GOOD_TOKEN)
            );
        }
        other => panic!("expected Completed, got {:?}", other),
    }
    assert_eq!(flow.state(), FlowState::Done);
}

#[tokio::test]
async fn rejected_token_returns_to_entry_form_with_invalid_auth() {
    let base = spawn_api().await;
    let mut flow = SetupFlow::new(FlowConfig {
        api_base_url: base,
        ..FlowConfig::default()
    });

    flow.choose_method(SetupMethod::Manual).await.unwrap();
    let event = flow.submit_manual("34:5f:45:ec:b8:34", "bad").await.unwrap();

    match event {
        FlowEvent::FormError { code } => assert_eq!(code, ErrorCode::InvalidAuth),
        other => panic!("expected FormError, got {:?}", other),
    }
    // Recoverable: flow is back at the entry form, not dead.
    assert_eq!(flow.state(), FlowState::ManualEntry);

    let event = flow
        .submit_manual("34:5f:45:ec:b8:34", GOOD_TOKEN)
        .await
        .unwrap();
    assert!(matches!(event, FlowEvent::Completed(_)));
}

#[tokio::test]
async fn unreachable_api_maps_to_cannot_connect() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut flow = SetupFlow::new(FlowConfig {
        api_base_url: format!("http://{}", addr),
        ..FlowConfig::default()
    });

    flow.choose_method(SetupMethod::Manual).await.unwrap();
    let event = flow.submit_manual("aa:bb", "tok").await.unwrap();
    match event {
        FlowEvent::FormError { code } => assert_eq!(code, ErrorCode::CannotConnect),
        other => panic!("expected FormError, got {:?}", other),
    }
}

#[tokio::test]
async fn automated_capture_validates_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_api().await;
    let handoff = MemoryHandoff::shared();

    let mut flow = SetupFlow::new(flow_config(dir.path(), base, 30))
        .with_handoff(handoff.clone());

    let event = flow.choose_method(SetupMethod::Automated).await.unwrap();
    let endpoint = match event {
        FlowEvent::ProxySetupReady(endpoint) => endpoint,
        other => panic!("expected ProxySetupReady, got {:?}", other),
    };
    assert_eq!(endpoint.host, "127.0.0.1");
    assert_eq!(flow.state(), FlowState::AwaitingProxySetup);

    // Simulate the addon capturing a request mid-wait.
    let writer = handoff.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer
            .fill(&Credential::new("34:5f:45:ec:b8:34", GOOD_TOKEN))
            .await
            .unwrap();
    });

    let event = flow.confirm_proxy_configured().await.unwrap();
    match event {
        FlowEvent::Completed(entry) => {
            assert_eq!(entry.title, "Duux Fan (34:5f:45:ec:b8:34)")
        }
        other => panic!("expected Completed, got {:?}", other),
    }
    assert_eq!(flow.state(), FlowState::Done);
}

#[tokio::test]
async fn capture_timeout_offers_retry() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_api().await;
    let handoff = MemoryHandoff::shared();

    let mut flow =
        SetupFlow::new(flow_config(dir.path(), base, 0)).with_handoff(handoff.clone());

    flow.choose_method(SetupMethod::Automated).await.unwrap();
    let event = flow.confirm_proxy_configured().await.unwrap();
    assert!(matches!(event, FlowEvent::CaptureTimedOut));
    assert_eq!(flow.state(), FlowState::AwaitingProxySetup);

    // A retry starts a fresh session.
    let event = flow.retry_capture().await.unwrap();
    assert!(matches!(event, FlowEvent::ProxySetupReady(_)));
    flow.cancel().await;
}

#[tokio::test]
async fn cancel_during_capture_aborts_and_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_api().await;
    let handoff = MemoryHandoff::shared();

    let mut flow =
        SetupFlow::new(flow_config(dir.path(), base, 60)).with_handoff(handoff.clone());

    flow.choose_method(SetupMethod::Automated).await.unwrap();

    let cancel = flow.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let event = flow.confirm_proxy_configured().await.unwrap();
    assert!(matches!(event, FlowEvent::Aborted));
    assert_eq!(flow.state(), FlowState::Aborted);
}

#[tokio::test]
async fn proxy_start_failure_is_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_api().await;
    let mut config = flow_config(dir.path(), base, 30);
    config.capture.proxy_program = "/nonexistent/mitmdump".to_string();

    let mut flow = SetupFlow::new(config);
    let event = flow.choose_method(SetupMethod::Automated).await.unwrap();
    match event {
        FlowEvent::FormError { code } => assert_eq!(code, ErrorCode::ProxyStartFailed),
        other => panic!("expected FormError, got {:?}", other),
    }
}

#[tokio::test]
async fn already_configured_device_is_rejected() {
    let base = spawn_api().await;
    let mut flow = SetupFlow::new(FlowConfig {
        api_base_url: base,
        already_configured: Some(Arc::new(|device_id: &str| device_id == "aa:bb")),
        ..FlowConfig::default()
    });

    flow.choose_method(SetupMethod::Manual).await.unwrap();
    let event = flow.submit_manual("aa:bb", GOOD_TOKEN).await.unwrap();
    match event {
        FlowEvent::FormError { code } => assert_eq!(code, ErrorCode::AlreadyConfigured),
        other => panic!("expected FormError, got {:?}", other),
    }
    assert_eq!(flow.state(), FlowState::Aborted);
}
