//! Registration, login, logout and the caller's profile

use crate::auth::SessionToken;
use crate::error::{created, ok};
use crate::services::identity::{LoginRequest, LoginResponse, RegisterRequest};
use crate::services::CurrentUser;
use crate::{ApiResult, AppState};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use lms_common::api::ApiEnvelope;
use lms_common::db::User;

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<ApiEnvelope<User>>)> {
    let user = state.services.identity.register(request).await?;
    Ok(created("Registered", user))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<ApiEnvelope<LoginResponse>>> {
    let response = state.services.identity.login(request).await?;
    Ok(ok("Logged in", response))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
) -> ApiResult<Json<ApiEnvelope<()>>> {
    state.services.identity.logout(&token.0).await?;
    Ok(ok("Logged out", ()))
}

/// GET /api/me
pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<ApiEnvelope<User>>> {
    let profile = state.services.identity.profile(&user).await?;
    Ok(ok("Profile", profile))
}

pub fn public_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
}

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/logout", post(logout))
        .route("/api/me", get(me))
}
