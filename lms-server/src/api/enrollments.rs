//! Enrollments

use crate::error::{created, ok};
use crate::services::enrollments::EnrollRequest;
use crate::services::CurrentUser;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use lms_common::api::ApiEnvelope;
use lms_common::db::Enrollment;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct EnrollmentFilter {
    /// Another user's enrollments; admin only
    pub user_id: Option<i64>,
}

/// POST /api/enrollments
///
/// A second open enrollment in the same program answers 409.
pub async fn enroll(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<EnrollRequest>,
) -> ApiResult<(StatusCode, Json<ApiEnvelope<Enrollment>>)> {
    let enrollment = state.services.enrollments.enroll(&user, request).await?;
    Ok(created("Enrolled", enrollment))
}

pub async fn list_enrollments(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(filter): Query<EnrollmentFilter>,
) -> ApiResult<Json<ApiEnvelope<Vec<Enrollment>>>> {
    let enrollments = state.services.enrollments.list_for_user(&user, filter.user_id).await?;
    Ok(ok("Enrollments", enrollments))
}

pub async fn get_enrollment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiEnvelope<Enrollment>>> {
    Ok(ok("Enrollment", state.services.enrollments.get(&user, id).await?))
}

pub async fn cancel_enrollment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiEnvelope<Enrollment>>> {
    let enrollment = state.services.enrollments.cancel(&user, id).await?;
    Ok(ok("Enrollment cancelled", enrollment))
}

pub fn enrollment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/enrollments", get(list_enrollments).post(enroll))
        .route("/api/enrollments/:id", get(get_enrollment))
        .route("/api/enrollments/:id/cancel", post(cancel_enrollment))
}
