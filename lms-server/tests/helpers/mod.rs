//! Shared helpers for lms-server integration tests
//!
//! Every test gets its own in-memory database and router; requests go
//! through `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use lms_common::config::TomlConfig;
use lms_common::events::EventBus;
use lms_server::services::MessageTransport;
use lms_server::{build_router, AppState};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const PASSWORD: &str = "correct-horse";

pub struct TestApp {
    pub state: AppState,
    pub db: SqlitePool,
}

impl TestApp {
    /// Fresh database with tenant `acme`
    pub async fn new() -> Self {
        let db = lms_common::db::init_memory_database().await.unwrap();
        let state = AppState::new(db.clone(), EventBus::new(64), TomlConfig::default());
        state
            .services
            .identity
            .create_tenant("acme", "Acme Academy", None)
            .await
            .unwrap();
        Self { state, db }
    }

    /// Same app with a different outbound message transport
    pub fn with_transport(mut self, transport: Arc<dyn MessageTransport>) -> Self {
        self.state = self.state.with_transport(transport);
        self
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Send a request and return the status plus the parsed JSON body
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(request("GET", uri, token, None)).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(request("PUT", uri, token, Some(body))).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(request("POST", uri, token, Some(body))).await
    }

    /// Register a user in `acme` and log in; returns the bearer token
    ///
    /// The first registered user of a tenant becomes its admin.
    pub async fn sign_up(&self, email: &str, name: &str) -> String {
        let (status, _) = self
            .post(
                "/api/auth/register",
                None,
                json!({ "tenant": "acme", "email": email, "password": PASSWORD, "display_name": name }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = self
            .post(
                "/api/auth/login",
                None,
                json!({ "tenant": "acme", "email": email, "password": PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["data"]["token"].as_str().unwrap().to_string()
    }

    /// Published free program with one course and one lesson; returns (program_id, lesson_id)
    pub async fn seed_catalog(&self, admin: &str, code: &str) -> (i64, i64) {
        let (status, program) = self
            .post(
                "/api/programs",
                Some(admin),
                json!({ "code": code, "title": format!("Program {}", code), "is_published": true }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let program_id = program["data"]["id"].as_i64().unwrap();

        let (_, course) = self
            .post(
                "/api/courses",
                Some(admin),
                json!({ "program_id": program_id, "code": format!("{}-C1", code), "title": "Basics" }),
            )
            .await;
        let course_id = course["data"]["id"].as_i64().unwrap();

        let (_, lesson) = self
            .post(
                "/api/lessons",
                Some(admin),
                json!({ "course_id": course_id, "code": format!("{}-L1", code), "title": "Welcome" }),
            )
            .await;
        (program_id, lesson["data"]["id"].as_i64().unwrap())
    }
}

pub fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}
