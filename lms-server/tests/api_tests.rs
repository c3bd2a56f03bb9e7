//! HTTP integration tests for lms-server
//!
//! Tests cover:
//! - Health endpoint without authentication
//! - Bearer token enforcement
//! - Enrollment conflicts
//! - Test attempt deadlines
//! - Bulk import reports
//! - Public certificate verification
//! - Message dispatch through a failing transport

mod helpers;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{Duration, Utc};
use helpers::{request, TestApp};
use lms_common::db::OutboundMessage;
use lms_server::services::messaging::TransportError;
use lms_server::services::MessageTransport;
use serde_json::json;
use std::sync::Arc;

// =============================================================================
// Health and authentication
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_no_auth_required() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["module"], "lms-server");
    assert!(body["data"]["version"].is_string());
}

#[tokio::test]
async fn test_protected_route_requires_token() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/api/programs", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = app.get("/api/programs", Some("not-a-real-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_invalidates_token() {
    let app = TestApp::new().await;
    let token = app.sign_up("ada@acme.test", "Ada").await;

    let (status, me) = app.get("/api/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["data"]["email"], "ada@acme.test");
    assert_eq!(me["data"]["role"], "admin");

    let (status, _) = app.post("/api/auth/logout", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get("/api/me", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_password_is_unauthorized() {
    let app = TestApp::new().await;
    app.sign_up("ada@acme.test", "Ada").await;

    let (status, body) = app
        .post(
            "/api/auth/login",
            None,
            json!({ "tenant": "acme", "email": "ada@acme.test", "password": "wrong-horse" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_kind"], "unauthorized");
}

// =============================================================================
// Enrollment and attempts
// =============================================================================

#[tokio::test]
async fn test_double_enrollment_conflicts() {
    let app = TestApp::new().await;
    let admin = app.sign_up("ada@acme.test", "Ada").await;
    let student = app.sign_up("sam@acme.test", "Sam").await;
    let (program_id, _) = app.seed_catalog(&admin, "P1").await;

    let (status, body) = app
        .post("/api/enrollments", Some(&student), json!({ "program_id": program_id }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "active");

    let (status, body) = app
        .post("/api/enrollments", Some(&student), json!({ "program_id": program_id }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_submit_after_deadline_is_rejected() {
    let app = TestApp::new().await;
    let admin = app.sign_up("ada@acme.test", "Ada").await;
    let student = app.sign_up("sam@acme.test", "Sam").await;
    let (program_id, lesson_id) = app.seed_catalog(&admin, "P1").await;

    let (status, test) = app
        .post(
            "/api/tests",
            Some(&admin),
            json!({
                "lesson_id": lesson_id,
                "title": "Quick check",
                "passing_score": 50,
                "time_limit_minutes": 10,
                "questions": [{
                    "prompt": "2 + 2?",
                    "kind": "single",
                    "options": [{ "text": "4", "is_correct": true }, { "text": "5", "is_correct": false }]
                }]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let test_id = test["data"]["id"].as_i64().unwrap();

    app.post("/api/enrollments", Some(&student), json!({ "program_id": program_id }))
        .await;
    let (status, attempt) = app
        .post(&format!("/api/tests/{}/attempts", test_id), Some(&student), json!({}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let attempt_id = attempt["data"]["id"].as_i64().unwrap();

    sqlx::query("UPDATE test_attempts SET deadline_at = ? WHERE id = ?")
        .bind(Utc::now() - Duration::minutes(1))
        .bind(attempt_id)
        .execute(&app.db)
        .await
        .unwrap();

    let uri = format!("/api/attempts/{}/submit", attempt_id);
    let (status, body) = app.post(&uri, Some(&student), json!({ "answers": [] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_kind"], "bad_request");

    let (_, attempts) = app
        .get(&format!("/api/tests/{}/attempts", test_id), Some(&student))
        .await;
    assert_eq!(attempts["data"][0]["status"], "expired");
}

// =============================================================================
// Import
// =============================================================================

#[tokio::test]
async fn test_import_reports_duplicate_rows() {
    let app = TestApp::new().await;
    let admin = app.sign_up("ada@acme.test", "Ada").await;

    let payload = json!([
        { "code": "DUP", "title": "First" },
        { "code": "DUP", "title": "Second" },
        { "code": "OTHER", "title": "Other" }
    ]);
    let (status, body) = app.post("/api/import/programs", Some(&admin), payload).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["added"], 2);
    assert_eq!(body["data"]["skipped"], 1);
    let messages: Vec<String> = serde_json::from_value(body["data"]["messages"].clone()).unwrap();
    assert!(messages
        .iter()
        .any(|m| m.contains("row 2") && m.contains("code=DUP")));

    let (_, runs) = app.get("/api/import/runs", Some(&admin)).await;
    assert_eq!(runs["data"]["total"], 1);
}

#[tokio::test]
async fn test_import_csv_dry_run_writes_nothing() {
    let app = TestApp::new().await;
    let admin = app.sign_up("ada@acme.test", "Ada").await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/import/programs?dry_run=true")
        .header(header::AUTHORIZATION, format!("Bearer {}", admin))
        .header(header::CONTENT_TYPE, "text/csv")
        .body(Body::from("code,title\nCSV1,From CSV\n"))
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["dry_run"], true);
    assert_eq!(body["data"]["added"], 1);

    let (_, programs) = app.get("/api/programs", Some(&admin)).await;
    assert_eq!(programs["data"]["total"], 0);
}

#[tokio::test]
async fn test_import_requires_admin() {
    let app = TestApp::new().await;
    app.sign_up("ada@acme.test", "Ada").await;
    let student = app.sign_up("sam@acme.test", "Sam").await;

    let (status, _) = app
        .post("/api/import/programs", Some(&student), json!([{ "code": "X", "title": "X" }]))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// =============================================================================
// Certificates
// =============================================================================

#[tokio::test]
async fn test_verify_unknown_certificate_is_not_found() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send(request("GET", "/api/certificates/verify/CERT-NOPE-0001", None, None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_kind"], "not_found");
}

// =============================================================================
// Messaging
// =============================================================================

struct RejectingTransport;

#[async_trait]
impl MessageTransport for RejectingTransport {
    async fn send(&self, _message: &OutboundMessage) -> Result<(), TransportError> {
        Err(TransportError("mailbox unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_dispatch_failure_is_reported_and_recorded() {
    let app = TestApp::new().await.with_transport(Arc::new(RejectingTransport));
    let admin = app.sign_up("ada@acme.test", "Ada").await;

    let (status, _) = app
        .put(
            "/api/messages/templates",
            Some(&admin),
            json!({ "code": "welcome", "locale": "en", "channel": "email", "subject": "Hi {{name}}", "body": "Welcome!" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, queued) = app
        .post(
            "/api/messages/queue",
            Some(&admin),
            json!({ "code": "welcome", "channel": "email", "recipient": "sam@acme.test", "vars": { "name": "Sam" } }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(queued["data"]["subject"], "Hi Sam");

    let (status, body) = app.post("/api/messages/dispatch", Some(&admin), json!({})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);

    let (_, messages) = app.get("/api/messages?status=failed", Some(&admin)).await;
    assert_eq!(messages["data"][0]["last_error"], "mailbox unavailable");
}
