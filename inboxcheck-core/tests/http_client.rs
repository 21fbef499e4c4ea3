//! Integration tests for the HTTP test service client.
//!
//! Each test starts an axum server on an ephemeral port that mimics the
//! deliverability API, then drives `HttpTestService` against it.

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use inboxcheck_core::{
    DetectionStatus, ErrorKind, Folder, HttpTestService, LifecycleState, PollingConfig,
    ServiceConfig, ServiceError, TestCode, TestLifecycle, TestService,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Default)]
struct Backend {
    status_calls: Arc<AtomicUsize>,
    detect_calls: Arc<AtomicUsize>,
}

fn router(backend: Backend) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tests", post(create_test))
        .route("/api/tests/history/{email}", get(history))
        .route("/api/tests/statistics/{email}", get(statistics))
        .route("/api/tests/{code}", get(results))
        .route("/api/tests/{code}/detect", post(detect))
        .route("/api/tests/{code}/status", get(status))
        .route("/api/reports/{code}", get(report))
        .route("/api/reports/{code}/summary", get(summary))
        .route("/api/reports/{code}/send", post(send_report))
        .with_state(backend)
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "message": "Test not found" })),
    )
        .into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "database": "connected" }))
}

async fn create_test(Json(body): Json<Value>) -> Response {
    match body.get("userEmail").and_then(Value::as_str) {
        Some(email) if !email.is_empty() => (
            StatusCode::CREATED,
            Json(json!({ "success": true, "data": { "testCode": "ABC123", "userEmail": email } })),
        )
            .into_response(),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "userEmail is required" })),
        )
            .into_response(),
    }
}

async fn detect(State(backend): State<Backend>, Path(code): Path<String>) -> Response {
    if code == "ZZZZZZ" {
        return not_found();
    }
    backend.detect_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "success": true, "message": "Detection started" })).into_response()
}

async fn status(State(backend): State<Backend>, Path(code): Path<String>) -> Response {
    match code.as_str() {
        "ZZZZZZ" => not_found(),
        "FAIL500" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "message": "IMAP login failed" })),
        )
            .into_response(),
        _ => {
            let n = backend.status_calls.fetch_add(1, Ordering::SeqCst);
            let data = if n == 0 {
                json!({ "status": "in_progress", "progress": { "completed": 1, "total": 2 } })
            } else {
                json!({ "status": "completed", "progress": { "completed": 2, "total": 2 }, "deliverabilityScore": 75 })
            };
            Json(json!({ "success": true, "data": data })).into_response()
        }
    }
}

async fn results(Path(code): Path<String>) -> Response {
    match code.as_str() {
        "ZZZZZZ" => not_found(),
        "BROKEN1" => Json(json!({ "status": "completed", "results": [] })).into_response(),
        _ => Json(json!({
            "success": true,
            "data": {
                "testCode": code,
                "deliverabilityScore": 75,
                "results": [
                    { "email": "agmetestg1@gmail.com", "folder": "inbox", "receivedAt": "2026-03-01T10:00:00Z", "provider": "Gmail" },
                    { "email": "agmetestg02@gmail.com", "folder": "spam", "provider": "Gmail" }
                ]
            }
        }))
        .into_response(),
    }
}

async fn report(Path(code): Path<String>, Query(params): Query<HashMap<String, String>>) -> Response {
    if code == "ZZZZZZ" {
        return not_found();
    }
    if params.get("format").map(String::as_str) == Some("pdf") {
        return (
            [(header::CONTENT_TYPE, "application/pdf")],
            b"%PDF-1.4 inboxcheck".to_vec(),
        )
            .into_response();
    }
    Json(json!({
        "success": true,
        "data": {
            "testCode": code,
            "userEmail": "user@example.com",
            "deliverabilityScore": 66.7,
            "overallStatus": "fair",
            "summary": {
                "totalInboxes": 3, "inboxCount": 2, "spamCount": 1,
                "promotionsCount": 0, "notReceivedCount": 0, "inboxPercentage": 66.7
            },
            "recommendations": [
                { "type": "warning", "title": "Authentication", "message": "Add a DMARC record" }
            ],
            "results": []
        }
    }))
    .into_response()
}

async fn summary(Path(code): Path<String>) -> Response {
    if code == "ZZZZZZ" {
        return not_found();
    }
    Json(json!({
        "data": { "totalInboxes": 2, "inboxCount": 1, "spamCount": 1, "inboxPercentage": 50.0 }
    }))
    .into_response()
}

async fn send_report(Path(code): Path<String>, Json(body): Json<Value>) -> Response {
    if code == "ZZZZZZ" {
        return not_found();
    }
    Json(json!({ "success": true, "message": format!("Report sent to {}", body["email"]) }))
        .into_response()
}

async fn history(Path(email): Path<String>) -> Json<Value> {
    Json(json!({
        "data": {
            "tests": [
                { "testCode": "ABC123", "userEmail": email, "status": "completed", "deliverabilityScore": 75 },
                { "testCode": "DEF456", "userEmail": email, "status": "pending" }
            ]
        }
    }))
}

async fn statistics(Path(_email): Path<String>) -> Json<Value> {
    Json(json!({
        "data": {
            "total_tests": 4,
            "average_score": 62.5,
            "total_emails": 8,
            "total_inbox": 5,
            "total_spam": 2,
            "total_promotions": 1,
            "total_not_received": 0
        }
    }))
}

async fn spawn_backend(backend: Backend) -> HttpTestService {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(backend)).await.unwrap();
    });
    HttpTestService::new(&ServiceConfig {
        base_url: format!("http://{}/", addr),
        ..ServiceConfig::default()
    })
    .unwrap()
}

fn code(raw: &str) -> TestCode {
    TestCode::parse(raw).unwrap()
}

#[tokio::test]
async fn test_health_accepts_bare_body() {
    let service = spawn_backend(Backend::default()).await;
    let health = service.check_health().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.details["database"], "connected");
}

#[tokio::test]
async fn test_create_test_returns_code() {
    let service = spawn_backend(Backend::default()).await;
    let created = service.create_test("user@example.com").await.unwrap();
    assert_eq!(created.as_str(), "ABC123");
}

#[tokio::test]
async fn test_create_test_rejection_carries_message() {
    let service = spawn_backend(Backend::default()).await;
    let err = service.create_test("").await.unwrap_err();
    assert_eq!(
        err,
        ServiceError::Status {
            status: 400,
            body: "userEmail is required".into()
        }
    );
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_status_and_results_unwrap_envelope() {
    let service = spawn_backend(Backend::default()).await;
    let status = service.get_status(&code("ABC123")).await.unwrap();
    assert_eq!(status.status, DetectionStatus::InProgress);
    assert_eq!(status.progress.unwrap().to_string(), "1/2");

    let results = service.get_results(&code("ABC123")).await.unwrap();
    assert_eq!(results.deliverability_score, Some(75));
    assert_eq!(results.results.len(), 2);
    assert_eq!(results.results[1].folder, Folder::Spam);
    assert!(results.results[0].received_at.is_some());
}

#[tokio::test]
async fn test_unknown_code_maps_to_not_found() {
    let service = spawn_backend(Backend::default()).await;
    let missing = code("ZZZZZZ");
    for err in [
        service.start_detection(&missing).await.unwrap_err(),
        service.get_status(&missing).await.unwrap_err(),
        service.get_results(&missing).await.unwrap_err(),
        service.get_report(&missing).await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::NotFound, "{:?}", err);
        assert!(err.is_terminal());
    }
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let service = spawn_backend(Backend::default()).await;
    let err = service.get_status(&code("FAIL500")).await.unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("IMAP login failed"));
}

#[tokio::test]
async fn test_missing_envelope_is_parse_error() {
    let service = spawn_backend(Backend::default()).await;
    let err = service.get_results(&code("BROKEN1")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
}

#[tokio::test]
async fn test_report_rounds_score_and_keeps_recommendations() {
    let service = spawn_backend(Backend::default()).await;
    let report = service.get_report(&code("ABC123")).await.unwrap();
    assert_eq!(report.deliverability_score, 67);
    assert_eq!(report.summary.inbox_count, 2);
    assert_eq!(report.recommendations[0].kind, "warning");

    let summary = service.get_report_summary(&code("ABC123")).await.unwrap();
    assert_eq!(summary.total_inboxes, 2);
    assert_eq!(summary.not_received_count, 0);
}

#[tokio::test]
async fn test_report_pdf_bytes() {
    let service = spawn_backend(Backend::default()).await;
    let pdf = service.get_report_pdf(&code("ABC123")).await.unwrap();
    assert!(pdf.starts_with(b"%PDF"));
}

#[tokio::test]
async fn test_send_report_accepts_bare_acknowledgement() {
    let service = spawn_backend(Backend::default()).await;
    service
        .send_report_email(&code("ABC123"), "user@example.com")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_history_path_encodes_email() {
    let service = spawn_backend(Backend::default()).await;
    let history = service.get_history("user+tag@example.com").await.unwrap();
    assert_eq!(history.tests.len(), 2);
    // The server decoded the path segment back to the original address.
    assert_eq!(
        history.tests[0].user_email.as_deref(),
        Some("user+tag@example.com")
    );
    assert_eq!(history.tests[0].score(), 75);
    assert_eq!(history.tests[1].status, DetectionStatus::Pending);
}

#[tokio::test]
async fn test_statistics_accepts_snake_case() {
    let service = spawn_backend(Backend::default()).await;
    let stats = service.get_statistics("user@example.com").await.unwrap();
    assert_eq!(stats.total_tests, 4);
    assert_eq!(stats.folder_total(Folder::Inbox), 5);
    assert_eq!(stats.trend, "neutral");
}

#[tokio::test]
async fn test_unreachable_service_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let service = HttpTestService::new(&ServiceConfig {
        base_url: format!("http://{}", addr),
        request_timeout_secs: 5,
        ..ServiceConfig::default()
    })
    .unwrap();
    let err = service.check_health().await.unwrap_err();
    assert!(matches!(err, ServiceError::Transport { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_lifecycle_over_http() {
    let backend = Backend::default();
    let service = Arc::new(spawn_backend(backend.clone()).await);
    let config = PollingConfig {
        interval_secs: 0,
        max_attempts: 10,
        max_wait_secs: 0,
        max_consecutive_failures: 3,
    };
    let lifecycle = TestLifecycle::new(service, config);

    lifecycle.generate("user@example.com").await.unwrap();
    let session = lifecycle.detect().await.unwrap();
    assert_eq!(session.state, LifecycleState::Completed);
    assert_eq!(session.final_score(), Some(75));
    assert_eq!(session.results.len(), 2);
    assert_eq!(backend.detect_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.status_calls.load(Ordering::SeqCst), 2);
}
