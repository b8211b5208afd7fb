//! Integration tests for the daemon API.
//!
//! These drive the real router, orchestrator, and colima adapter
//! against a stub `colima` executable, so the whole path from HTTP
//! request to process invocation and output parsing is exercised.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use caravel_core::{ColimaCli, ConfigManager, Envelope, Orchestrator, Redactor};
use caravel_daemon::server::router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

// ============================================================================
// Stub hypervisor
// ============================================================================

/// Writes a stub `colima` that tracks running state via a marker file.
fn write_stub_colima(dir: &TempDir) -> PathBuf {
    let marker = dir.path().join("vm-running");
    let script = format!(
        r#"#!/bin/sh
MARKER="{marker}"
case "$1" in
  list)
    echo "PROFILE    STATUS     ARCH       CPUS    MEMORY    DISK     RUNTIME    ADDRESS"
    if [ -f "$MARKER" ]; then
      echo "default    Running    aarch64    2       4GiB      60GiB    docker     192.168.106.2"
    else
      echo "default    Stopped    aarch64    2       4GiB      60GiB    docker"
    fi
    ;;
  version)
    echo "colima version 0.6.8"
    echo "git commit: 1111111111111111111111111111111111111111"
    ;;
  start)
    touch "$MARKER"
    ;;
  stop)
    if [ ! -f "$MARKER" ]; then
      echo "FATA[0000] colima is not running" >&2
      exit 1
    fi
    rm -f "$MARKER"
    ;;
  *)
    echo "unknown command: $1" >&2
    exit 1
    ;;
esac
"#,
        marker = marker.display()
    );

    let path = dir.path().join("colima");
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn app_with_binary(dir: &TempDir, binary: PathBuf) -> Router {
    let config = Arc::new(ConfigManager::new(dir.path().join("config.toml")));
    let adapter = ColimaCli::new(binary, Envelope::new(Redactor::default()));
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(adapter), config));
    router(orchestrator)
}

fn app(dir: &TempDir) -> Router {
    let binary = write_stub_colima(dir);
    app_with_binary(dir, binary)
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(json) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => Request::builder().method(method).uri(uri).body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_status_of_stopped_vm() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);

    let (status, body) = request(&app, "GET", "/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "stopped");
    assert_eq!(body["restart_required"], false);
    assert_eq!(body["snapshot"]["cpus"], 2);
}

#[tokio::test]
async fn test_start_then_status_reports_running() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);

    let (status, body) = request(&app, "POST", "/v1/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");

    let (status, body) = request(&app, "GET", "/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");
    assert_eq!(body["snapshot"]["address"], "192.168.106.2");
}

#[tokio::test]
async fn test_stop_is_idempotent_through_the_full_stack() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);

    // VM starts stopped; the stub even exits non-zero with colima's
    // "not running" message, which the adapter must classify as a no-op.
    let (status, body) = request(&app, "POST", "/v1/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "stopped");

    let (status, body) = request(&app, "POST", "/v1/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "stopped");
}

#[tokio::test]
async fn test_restart_round_trip() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);

    request(&app, "POST", "/v1/start", None).await;
    let (status, body) = request(&app, "POST", "/v1/restart", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_update_config_returns_decision_and_persists() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);

    let (status, body) =
        request(&app, "PATCH", "/v1/config", Some(serde_json::json!({"cpus": 8}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["restart_required"], true);
    assert_eq!(body["changed_fields"], serde_json::json!(["vm.cpus"]));

    let (status, body) = request(&app, "GET", "/v1/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["vm"]["cpus"], 8);

    // The advisory flag shows up on status until a restart happens.
    let (_, body) = request(&app, "GET", "/v1/status", None).await;
    assert_eq!(body["restart_required"], true);

    request(&app, "POST", "/v1/restart", None).await;
    let (_, body) = request(&app, "GET", "/v1/status", None).await;
    assert_eq!(body["restart_required"], false);
}

#[tokio::test]
async fn test_invalid_config_update_is_unprocessable_with_all_violations() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);

    let (status, body) = request(
        &app,
        "PATCH",
        "/v1/config",
        Some(serde_json::json!({"cpus": 0, "port": 80})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "invalid_config");
    assert_eq!(body["violations"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_log_level_change_does_not_require_restart() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);

    let (status, body) = request(
        &app,
        "PATCH",
        "/v1/config",
        Some(serde_json::json!({"log_level": "debug"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["restart_required"], false);
    assert_eq!(body["changed_fields"], serde_json::json!(["daemon.log_level"]));
}

#[tokio::test]
async fn test_start_with_per_boot_override_does_not_persist() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);

    let (status, _) = request(
        &app,
        "POST",
        "/v1/start",
        Some(serde_json::json!({"config": {"cpus": 4}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = request(&app, "GET", "/v1/config", None).await;
    assert_eq!(body["config"]["vm"]["cpus"], 2);
}

// ============================================================================
// Version and error mapping
// ============================================================================

#[tokio::test]
async fn test_version_reports_daemon_and_colima() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);

    let (status, body) = request(&app, "GET", "/v1/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["colima"]["version"], "0.6.8");
    assert!(body["daemon"].as_str().is_some());
}

#[tokio::test]
async fn test_missing_binary_maps_to_service_unavailable() {
    let temp = TempDir::new().unwrap();
    let app = app_with_binary(&temp, temp.path().join("no-such-colima"));

    // Status itself answers: the state is not_installed.
    let (status, body) = request(&app, "GET", "/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "not_installed");

    // Lifecycle operations are typed failures.
    let (status, body) = request(&app, "POST", "/v1/start", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "not_installed");
}
