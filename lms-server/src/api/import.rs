//! Bulk import endpoints
//!
//! `POST /api/import/:entity` takes a JSON array of objects or, with a
//! `text/csv` content type, a CSV document with a header row.
//! `?dry_run=true` runs every decision and rolls back.

use crate::error::ok;
use crate::import::{ImportOptions, ImportReport, InputFormat};
use crate::pagination::{Page, PageRequest};
use crate::services::CurrentUser;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    routing::{get, post},
    Extension, Json, Router,
};
use lms_common::api::ApiEnvelope;
use lms_common::db::ImportRun;

/// POST /api/import/:entity
pub async fn import_entity(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(entity): Path<String>,
    Query(options): Query<ImportOptions>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<ApiEnvelope<ImportReport>>> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let format = InputFormat::from_content_type(content_type);

    let report = state
        .services
        .imports
        .import_payload(&user, &entity, format, &body, options)
        .await?;

    let message = if report.dry_run {
        "Dry run finished, nothing was written"
    } else {
        "Import finished"
    };
    Ok(ok(message, report))
}

/// GET /api/import/runs
pub async fn list_runs(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Json<ApiEnvelope<Page<ImportRun>>>> {
    let runs = state.services.imports.list_runs(&user, page).await?;
    Ok(ok("Import runs", runs))
}

pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/api/import/runs", get(list_runs))
        .route("/api/import/:entity", post(import_entity))
}
