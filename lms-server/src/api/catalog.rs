//! Programs, courses and lessons
//!
//! Listings are paginated with `?page=&page_size=`; courses and lessons
//! also filter by parent (`?program_id=`, `?course_id=`).

use crate::error::{created, ok};
use crate::pagination::{Page, PageRequest};
use crate::services::catalog::{CourseInput, LessonInput, ProgramInput};
use crate::services::CurrentUser;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use lms_common::api::ApiEnvelope;
use lms_common::db::{Course, Lesson, Program};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct CourseFilter {
    pub program_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LessonFilter {
    pub course_id: Option<i64>,
}

type Created<T> = ApiResult<(StatusCode, Json<ApiEnvelope<T>>)>;
type Reply<T> = ApiResult<Json<ApiEnvelope<T>>>;

pub async fn create_program(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<ProgramInput>,
) -> Created<Program> {
    let program = state.services.catalog.create_program(&user, input).await?;
    Ok(created("Program created", program))
}

pub async fn list_programs(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(page): Query<PageRequest>,
) -> Reply<Page<Program>> {
    let programs = state.services.catalog.list_programs(&user, page).await?;
    Ok(ok("Programs", programs))
}

pub async fn get_program(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Reply<Program> {
    Ok(ok("Program", state.services.catalog.get_program(&user, id).await?))
}

pub async fn update_program(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(input): Json<ProgramInput>,
) -> Reply<Program> {
    let program = state.services.catalog.update_program(&user, id, input).await?;
    Ok(ok("Program updated", program))
}

pub async fn delete_program(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Reply<()> {
    state.services.catalog.delete_program(&user, id).await?;
    Ok(ok("Program deleted", ()))
}

pub async fn create_course(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<CourseInput>,
) -> Created<Course> {
    let course = state.services.catalog.create_course(&user, input).await?;
    Ok(created("Course created", course))
}

pub async fn list_courses(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(filter): Query<CourseFilter>,
    Query(page): Query<PageRequest>,
) -> Reply<Page<Course>> {
    let courses = state
        .services
        .catalog
        .list_courses(&user, filter.program_id, page)
        .await?;
    Ok(ok("Courses", courses))
}

pub async fn get_course(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Reply<Course> {
    Ok(ok("Course", state.services.catalog.get_course(&user, id).await?))
}

pub async fn update_course(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(input): Json<CourseInput>,
) -> Reply<Course> {
    let course = state.services.catalog.update_course(&user, id, input).await?;
    Ok(ok("Course updated", course))
}

pub async fn delete_course(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Reply<()> {
    state.services.catalog.delete_course(&user, id).await?;
    Ok(ok("Course deleted", ()))
}

pub async fn create_lesson(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<LessonInput>,
) -> Created<Lesson> {
    let lesson = state.services.catalog.create_lesson(&user, input).await?;
    Ok(created("Lesson created", lesson))
}

pub async fn list_lessons(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(filter): Query<LessonFilter>,
    Query(page): Query<PageRequest>,
) -> Reply<Page<Lesson>> {
    let lessons = state
        .services
        .catalog
        .list_lessons(&user, filter.course_id, page)
        .await?;
    Ok(ok("Lessons", lessons))
}

pub async fn get_lesson(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Reply<Lesson> {
    Ok(ok("Lesson", state.services.catalog.get_lesson(&user, id).await?))
}

pub async fn update_lesson(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(input): Json<LessonInput>,
) -> Reply<Lesson> {
    let lesson = state.services.catalog.update_lesson(&user, id, input).await?;
    Ok(ok("Lesson updated", lesson))
}

pub async fn delete_lesson(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Reply<()> {
    state.services.catalog.delete_lesson(&user, id).await?;
    Ok(ok("Lesson deleted", ()))
}

pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/api/programs", get(list_programs).post(create_program))
        .route(
            "/api/programs/:id",
            get(get_program).put(update_program).delete(delete_program),
        )
        .route("/api/courses", get(list_courses).post(create_course))
        .route(
            "/api/courses/:id",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route("/api/lessons", get(list_lessons).post(create_lesson))
        .route(
            "/api/lessons/:id",
            get(get_lesson).put(update_lesson).delete(delete_lesson),
        )
}
