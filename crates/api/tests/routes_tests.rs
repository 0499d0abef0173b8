use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use batchd_api::create_app;
use batchd_core::Procedure;
use batchd_head::{HeadEngine, HeadEngineConfig};
use batchd_infrastructure::InMemoryTaskStore;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    let engine = Arc::new(HeadEngine::new(
        Arc::new(InMemoryTaskStore::new()),
        vec![Procedure::shell("build", "make")],
        HeadEngineConfig {
            max_wait_timeout: Duration::from_millis(200),
            ..HeadEngineConfig::default()
        },
    ));
    create_app(engine)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_check() {
    let (status, body) = call(&app(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_submit_and_show_task() {
    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/jobs",
        Some(json!({"jobId": "j1", "procedureId": "build", "settings": [["A", "1"]]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["message"], "waiting");
    let task_id = body["data"]["taskId"].as_str().unwrap().to_string();

    let (status, body) = call(&app, "GET", &format!("/api/v1/tasks/{task_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "waiting");
    assert_eq!(body["data"]["settings"], json!([["A", "1"]]));

    let (_, body) = call(&app, "GET", &format!("/api/v1/tasks/{task_id}/status"), None).await;
    assert_eq!(body["data"], json!({"state": "waiting"}));

    let (_, body) = call(&app, "GET", "/api/v1/tasks", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_malformed_requirement_is_bad_request() {
    let (status, body) = call(
        &app(),
        "POST",
        "/api/v1/jobs",
        Some(json!({"jobId": "j1", "procedureId": "build", "requirement": "cpu >="})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["type"], "INVALID_REQUIREMENT");
}

#[tokio::test]
async fn test_deeply_nested_requirement_is_rejected() {
    let requirement = format!("{}cpu >= 1{}", "(".repeat(200_000), ")".repeat(200_000));
    let (status, body) = call(
        &app(),
        "POST",
        "/api/v1/jobs",
        Some(json!({"jobId": "j1", "procedureId": "build", "requirement": requirement})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "INVALID_REQUIREMENT");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("nesting deeper than"));
}

#[tokio::test]
async fn test_out_of_range_timeout_is_bad_request() {
    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/jobs",
        Some(json!({"jobId": "j1", "procedureId": "build", "timeoutSeconds": u64::MAX})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "BAD_REQUEST");

    let (_, body) = call(&app, "GET", "/api/v1/tasks", None).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_malformed_bodies_get_error_envelope() {
    let app = app();
    let (status, body) = call(&app, "POST", "/api/v1/jobs", Some(json!({"jobId": "j1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["type"], "BAD_REQUEST");

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/workers/status",
        Some(json!({"worker": "w1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "BAD_REQUEST");

    let (status, body) = call(&app, "GET", "/api/v1/tasks/t1/wait?timeoutMs=soon", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let (status, body) = call(&app(), "GET", "/api/v1/tasks/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "TASK_NOT_FOUND");
}

#[tokio::test]
async fn test_worker_round_trip() {
    let app = app();
    let (_, body) = call(
        &app,
        "POST",
        "/api/v1/jobs",
        Some(json!({"jobId": "j1", "procedureId": "build"})),
    )
    .await;
    let task_id = body["data"]["taskId"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/workers/register",
        Some(json!({"worker": "w1", "session": "s1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["orphaned"], json!([]));

    let (_, body) = call(
        &app,
        "POST",
        "/api/v1/workers/claim",
        Some(json!({"worker": "w1", "session": "s1", "resources": {"cpu": 4}, "timeoutMs": 100})),
    )
    .await;
    assert_eq!(body["data"]["taskId"], task_id.as_str());
    assert_eq!(body["data"]["data"]["definition"], "make");

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/workers/status",
        Some(json!({
            "worker": "w1",
            "session": "s1",
            "status": {"jobId": task_id, "state": "failed", "returnCode": 2, "message": "oops"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, body) = call(&app, "GET", &format!("/api/v1/tasks/{task_id}"), None).await;
    assert_eq!(body["data"]["state"], "failed");
    assert_eq!(body["data"]["returnCode"], 2);

    // nothing left: the claim long-poll times out with null data
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/workers/claim",
        Some(json!({"worker": "w1", "session": "s1", "timeoutMs": 50})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_wait_returns_after_clamped_timeout() {
    let app = app();
    let (_, body) = call(
        &app,
        "POST",
        "/api/v1/jobs",
        Some(json!({"jobId": "j1", "procedureId": "build"})),
    )
    .await;
    let task_id = body["data"]["taskId"].as_str().unwrap().to_string();
    let (_, body) = call(&app, "GET", &format!("/api/v1/tasks/{task_id}"), None).await;
    let fingerprint = body["data"]["fingerprint"].as_u64().unwrap();

    let started = std::time::Instant::now();
    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/v1/tasks/{task_id}/wait?fingerprint={fingerprint}&timeoutMs=10000"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fingerprint"].as_u64(), Some(fingerprint));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_signal_and_cancel() {
    let app = app();
    let (_, body) = call(
        &app,
        "POST",
        "/api/v1/jobs",
        Some(json!({"jobId": "j1", "procedureId": "build"})),
    )
    .await;
    let task_id = body["data"]["taskId"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/signal",
        Some(json!({"taskId": task_id, "signal": "NOPE"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "INVALID_SIGNAL");

    let (status, body) = call(&app, "POST", &format!("/api/v1/tasks/{task_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "failed");

    let (_, body) = call(&app, "GET", "/api/v1/procedures", None).await;
    assert_eq!(body["data"]["ids"], json!(["build"]));
}
