//! Tests, attempts and results

use crate::error::{created, ok};
use crate::services::quizzes::{CreateTestRequest, TestView};
use crate::services::test_attempts::{AttemptOutcome, SubmitRequest};
use crate::services::CurrentUser;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use lms_common::api::ApiEnvelope;
use lms_common::db::{Test, TestAttempt, TestResult};

type Reply<T> = ApiResult<Json<ApiEnvelope<T>>>;

pub async fn create_test(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CreateTestRequest>,
) -> ApiResult<(StatusCode, Json<ApiEnvelope<TestView>>)> {
    let view = state.services.tests.create_test(&user, request).await?;
    Ok(created("Test created", view))
}

/// GET /api/tests/:id
///
/// Correct answers are only included for authors.
pub async fn get_test(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Reply<TestView> {
    Ok(ok("Test", state.services.tests.get_test(&user, id).await?))
}

pub async fn list_lesson_tests(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(lesson_id): Path<i64>,
) -> Reply<Vec<Test>> {
    let tests = state.services.tests.list_for_lesson(&user, lesson_id).await?;
    Ok(ok("Tests", tests))
}

pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(test_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<ApiEnvelope<TestAttempt>>)> {
    let attempt = state.services.attempts.start_attempt(&user, test_id).await?;
    Ok(created("Attempt started", attempt))
}

pub async fn list_attempts(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(test_id): Path<i64>,
) -> Reply<Vec<TestAttempt>> {
    let attempts = state.services.attempts.list_attempts(&user, test_id).await?;
    Ok(ok("Attempts", attempts))
}

pub async fn best_result(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(test_id): Path<i64>,
) -> Reply<TestResult> {
    let result = state.services.attempts.best_result(&user, test_id).await?;
    Ok(ok("Best result", result))
}

/// POST /api/attempts/:id/submit
///
/// Submitting after the deadline expires the attempt and answers 400.
pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<i64>,
    Json(request): Json<SubmitRequest>,
) -> Reply<AttemptOutcome> {
    let outcome = state
        .services
        .attempts
        .submit_attempt(&user, attempt_id, request)
        .await?;
    Ok(ok("Attempt submitted", outcome))
}

pub fn test_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tests", post(create_test))
        .route("/api/tests/:id", get(get_test))
        .route("/api/lessons/:id/tests", get(list_lesson_tests))
        .route("/api/tests/:id/attempts", get(list_attempts).post(start_attempt))
        .route("/api/tests/:id/result", get(best_result))
        .route("/api/attempts/:id/submit", post(submit_attempt))
}
