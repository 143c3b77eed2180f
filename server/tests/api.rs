//! End-to-end control-API tests against an in-process router (spec §8 seed scenarios).

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use vibetunnel_core::config::Config;
use vibetunnel_core::session::SessionManager;
use vibetunnel_server::{router, AppState};

fn test_state(control_dir: &std::path::Path) -> AppState {
    let mut config = Config::default();
    config.control_dir = control_dir.to_path_buf();
    config.idle_interval = Duration::from_millis(50);
    config.kill_grace = Duration::from_millis(300);
    AppState {
        sessions: Arc::new(SessionManager::new(config)),
        started_at: Instant::now(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn echo_session_exits_with_code_zero() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let create = Request::builder()
        .method("POST")
        .uri("/api/sessions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"command": ["echo", "hi"], "workingDir": dir.path()}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let id = body["sessionId"].as_str().unwrap().to_string();

    for _ in 0..50 {
        let get = Request::builder().uri(format!("/api/sessions/{id}")).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(get).await.unwrap();
        let body = body_json(response).await;
        if body["status"] == "exited" {
            assert_eq!(body["exitCode"], 0);
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("session never reached exited status");
}

#[tokio::test]
async fn list_includes_a_running_session_with_a_custom_id() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let create = Request::builder()
        .method("POST")
        .uri("/api/sessions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "command": ["sleep", "5"],
                "workingDir": dir.path(),
                "sessionId": "test1234",
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let list = Request::builder().uri("/api/sessions").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(list).await.unwrap();
    let body = body_json(response).await;
    let sessions = body.as_array().unwrap();
    let found = sessions.iter().find(|s| s["id"] == "test1234").unwrap();
    assert_eq!(found["status"], "running");
}

#[tokio::test]
async fn invalid_working_dir_is_rejected_with_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let create = Request::builder()
        .method("POST")
        .uri("/api/sessions")
        .header("content-type", "application/json")
        .body(Body::from(json!({"command": ["true"], "workingDir": "/nonexistent"}).to_string()))
        .unwrap();
    let response = app.oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("working directory"));
}

#[tokio::test]
async fn kill_escalates_to_sigkill_and_exit_code_reflects_signal() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let create = Request::builder()
        .method("POST")
        .uri("/api/sessions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "command": ["bash", "-c", "trap '' TERM; sleep 5"],
                "workingDir": dir.path(),
                "sessionId": "killme01",
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/sessions/killme01")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let deadline = Instant::now() + Duration::from_secs(6);
    loop {
        let get = Request::builder().uri("/api/sessions/killme01").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(get).await.unwrap();
        let body = body_json(response).await;
        if body["status"] == "exited" {
            assert!(body["exitCode"].as_i64().unwrap() < 0);
            return;
        }
        if Instant::now() > deadline {
            panic!("session did not exit within the kill-grace window");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn resize_reflects_in_text_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));

    let create = Request::builder()
        .method("POST")
        .uri("/api/sessions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "command": ["sleep", "5"],
                "workingDir": dir.path(),
                "sessionId": "resize01",
                "cols": 80,
                "rows": 24,
            })
            .to_string(),
        ))
        .unwrap();
    app.clone().oneshot(create).await.unwrap();

    let resize = Request::builder()
        .method("POST")
        .uri("/api/sessions/resize01/resize")
        .header("content-type", "application/json")
        .body(Body::from(json!({"cols": 120, "rows": 40}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(resize).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let get = Request::builder().uri("/api/sessions/resize01").body(Body::empty()).unwrap();
    let response = app.oneshot(get).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["cols"], 120);
    assert_eq!(body["rows"], 40);
}

#[tokio::test]
async fn health_endpoint_reports_session_count() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(test_state(dir.path()));
    let req = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["sessions"], 0);
}
