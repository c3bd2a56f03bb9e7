//! lms-server library interface
//!
//! Exposes the router, application state and services for the binary and
//! for integration tests.

pub mod api;
pub mod auth;
pub mod db;
pub mod error;
pub mod import;
pub mod pagination;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use lms_common::config::TomlConfig;
use lms_common::events::EventBus;
use services::{LogTransport, MessageTransport, Services};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub services: Services,
    /// Outbound message transport used by dispatch
    pub transport: Arc<dyn MessageTransport>,
    pub config: Arc<TomlConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, config: TomlConfig) -> Self {
        let services = Services::new(db.clone(), event_bus.clone(), config.import.max_batch_size);
        Self {
            db,
            event_bus,
            services,
            transport: Arc::new(LogTransport::new(config.mail.from_address.clone())),
            config: Arc::new(config),
            startup_time: Utc::now(),
        }
    }

    /// Replace the message transport
    pub fn with_transport(mut self, transport: Arc<dyn MessageTransport>) -> Self {
        self.transport = transport;
        self
    }
}

/// Build application router
///
/// Health, registration, login and certificate verification are public;
/// everything else sits behind the bearer token middleware.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;

    let protected = Router::new()
        .merge(api::account_routes())
        .merge(api::catalog_routes())
        .merge(api::enrollment_routes())
        .merge(api::test_routes())
        .merge(api::progress_routes())
        .merge(api::certificate_routes())
        .merge(api::payment_routes())
        .merge(api::message_routes())
        .merge(api::translation_routes())
        .merge(api::import_routes())
        .merge(api::event_routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::auth_middleware));

    let public = Router::new()
        .merge(api::health_routes())
        .merge(api::public_auth_routes())
        .merge(api::public_certificate_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
