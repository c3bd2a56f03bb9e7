//! HTTP error type for lms-server
//!
//! Every failure leaves the server as the uniform envelope
//! `{"success": false, "message": ..., "error_kind": ...}` with the status
//! code matching its kind.

use crate::services::ServiceError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lms_common::api::{ApiEnvelope, ErrorKind};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Business rule or validation failure from a service
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// Malformed request the handler rejected before any service call
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// lms-common error
    #[error("Common error: {0}")]
    Common(#[from] lms_common::Error),
}

impl ApiError {
    fn kind_and_message(self) -> (ErrorKind, String) {
        match self {
            ApiError::Service(err) => (err.kind, err.message),
            ApiError::BadRequest(msg) => (ErrorKind::BadRequest, msg),
            ApiError::Unauthorized(msg) => (ErrorKind::Unauthorized, msg),
            ApiError::Common(err) => {
                let err = ServiceError::from(err);
                (err.kind, err.message)
            }
        }
    }
}

/// HTTP status for an error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (kind, message) = self.kind_and_message();
        let status = status_for(kind);
        if status.is_server_error() {
            error!(%message, "Request failed");
        }

        let body: ApiEnvelope<()> = ApiEnvelope::error(kind, message);
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Successful envelope with `data`
pub fn ok<T: Serialize>(message: impl Into<String>, data: T) -> Json<ApiEnvelope<T>> {
    Json(ApiEnvelope::ok(message, data))
}

/// Successful envelope answered with 201 Created
pub fn created<T: Serialize>(message: impl Into<String>, data: T) -> (StatusCode, Json<ApiEnvelope<T>>) {
    (StatusCode::CREATED, ok(message, data))
}
