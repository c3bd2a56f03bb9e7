//! Translations: admin upsert/delete, lookups with locale fallback

use crate::error::ok;
use crate::services::localization::TranslationInput;
use crate::services::CurrentUser;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, State},
    routing::{get, put},
    Extension, Json, Router,
};
use lms_common::api::ApiEnvelope;
use std::collections::BTreeMap;

type Reply<T> = ApiResult<Json<ApiEnvelope<T>>>;

pub async fn set_translation(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<TranslationInput>,
) -> Reply<()> {
    state.services.localization.set_translation(&user, input).await?;
    Ok(ok("Translation saved", ()))
}

/// GET /api/translations/:locale
///
/// Every key visible in the locale, with fallback values filled in.
pub async fn bundle(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(locale): Path<String>,
) -> Reply<BTreeMap<String, String>> {
    let bundle = state.services.localization.bundle(user.tenant_id, &locale).await?;
    Ok(ok("Translations", bundle))
}

pub async fn translate(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((locale, key)): Path<(String, String)>,
) -> Reply<String> {
    let value = state
        .services
        .localization
        .translate(user.tenant_id, &locale, &key)
        .await?;
    Ok(ok("Translation", value))
}

pub async fn delete_translation(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((locale, key)): Path<(String, String)>,
) -> Reply<()> {
    state
        .services
        .localization
        .delete_translation(&user, &locale, &key)
        .await?;
    Ok(ok("Translation deleted", ()))
}

pub fn translation_routes() -> Router<AppState> {
    Router::new()
        .route("/api/translations", put(set_translation))
        .route("/api/translations/:locale", get(bundle))
        .route(
            "/api/translations/:locale/:key",
            get(translate).delete(delete_translation),
        )
}
