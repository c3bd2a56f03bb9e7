//! Lesson completion and progress roll-ups

use crate::error::ok;
use crate::services::progress::{CompletionOutcome, CourseProgress, ProgramProgress};
use crate::services::CurrentUser;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use lms_common::api::ApiEnvelope;

pub async fn complete_lesson(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(lesson_id): Path<i64>,
) -> ApiResult<Json<ApiEnvelope<CompletionOutcome>>> {
    let outcome = state.services.progress.complete_lesson(&user, lesson_id).await?;
    Ok(ok("Lesson completed", outcome))
}

pub async fn course_progress(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(course_id): Path<i64>,
) -> ApiResult<Json<ApiEnvelope<CourseProgress>>> {
    let progress = state.services.progress.course_progress(&user, course_id).await?;
    Ok(ok("Course progress", progress))
}

pub async fn program_progress(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(program_id): Path<i64>,
) -> ApiResult<Json<ApiEnvelope<ProgramProgress>>> {
    let progress = state.services.progress.program_progress(&user, program_id).await?;
    Ok(ok("Program progress", progress))
}

pub fn progress_routes() -> Router<AppState> {
    Router::new()
        .route("/api/lessons/:id/complete", post(complete_lesson))
        .route("/api/progress/courses/:id", get(course_progress))
        .route("/api/progress/programs/:id", get(program_progress))
}
