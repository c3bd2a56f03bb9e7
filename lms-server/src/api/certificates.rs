//! Certificates: listing, HTML rendering and public verification

use crate::db::certificates::CertificateDetails;
use crate::error::ok;
use crate::services::CurrentUser;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, State},
    http::header::CONTENT_TYPE,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use lms_common::api::ApiEnvelope;
use lms_common::db::Certificate;

pub async fn list_certificates(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<ApiEnvelope<Vec<Certificate>>>> {
    let certificates = state.services.certificates.list_for_user(&user).await?;
    Ok(ok("Certificates", certificates))
}

/// GET /api/certificates/:id/html
pub async fn render_certificate(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let (content_type, document) = state.services.certificates.render(&user, id).await?;
    Ok(([(CONTENT_TYPE, content_type)], document))
}

/// GET /api/certificates/verify/:number (no authentication)
pub async fn verify_certificate(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> ApiResult<Json<ApiEnvelope<CertificateDetails>>> {
    let details = state.services.certificates.verify(&number).await?;
    Ok(ok("Certificate is valid", details))
}

pub fn certificate_routes() -> Router<AppState> {
    Router::new()
        .route("/api/certificates", get(list_certificates))
        .route("/api/certificates/:id/html", get(render_certificate))
}

pub fn public_certificate_routes() -> Router<AppState> {
    Router::new().route("/api/certificates/verify/:number", get(verify_certificate))
}
