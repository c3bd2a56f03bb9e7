//! Bearer token authentication middleware
//!
//! Applied to protected routes only. A valid `Authorization: Bearer <token>`
//! header puts the caller's [`CurrentUser`] and the raw [`SessionToken`]
//! into the request extensions; anything else is a 401 envelope.

use crate::services::CurrentUser;
use crate::{ApiError, AppState};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::debug;

/// Session token of the current request, for logout
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request)
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?
        .to_string();

    let user: CurrentUser = state.services.identity.authenticate(&token).await?;
    debug!(user_id = user.user_id, tenant_id = user.tenant_id, "Authenticated request");

    request.extensions_mut().insert(user);
    request.extensions_mut().insert(SessionToken(token));
    Ok(next.run(request).await)
}

fn bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
