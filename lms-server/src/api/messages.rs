//! Message templates, the outbox and dispatch (admin only)

use crate::error::{created, ok};
use crate::pagination::{PageRequest, MAX_PAGE_SIZE};
use crate::services::messaging::{DispatchReport, QueueRequest, TemplateInput};
use crate::services::CurrentUser;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use lms_common::api::ApiEnvelope;
use lms_common::db::init::get_setting_i64;
use lms_common::db::{MessageStatus, MessageTemplate, OutboundMessage};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct MessageFilter {
    pub status: Option<MessageStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchRequest {
    /// Defaults to the `message_dispatch_batch_size` setting
    #[serde(default)]
    pub limit: Option<i64>,
}

type Reply<T> = ApiResult<Json<ApiEnvelope<T>>>;

pub async fn save_template(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<TemplateInput>,
) -> Reply<MessageTemplate> {
    let template = state.services.messaging.save_template(&user, input).await?;
    Ok(ok("Template saved", template))
}

pub async fn list_templates(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Reply<Vec<MessageTemplate>> {
    let templates = state.services.messaging.list_templates(&user).await?;
    Ok(ok("Templates", templates))
}

pub async fn queue_message(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<QueueRequest>,
) -> ApiResult<(StatusCode, Json<ApiEnvelope<OutboundMessage>>)> {
    user.require_admin()?;
    let message = state.services.messaging.queue_templated(user.tenant_id, request).await?;
    Ok(created("Message queued", message))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(filter): Query<MessageFilter>,
    Query(page): Query<PageRequest>,
) -> Reply<Vec<OutboundMessage>> {
    let page_size = page.page_size.clamp(1, MAX_PAGE_SIZE);
    let offset = (page.page.max(1) - 1) * page_size;
    let messages = state
        .services
        .messaging
        .list_messages(&user, filter.status, page_size, offset)
        .await?;
    Ok(ok("Messages", messages))
}

/// POST /api/messages/dispatch
///
/// Sends queued messages through the configured transport. When any
/// message fails the response is an error envelope; the failures are
/// recorded on the messages either way.
pub async fn dispatch(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    body: Option<Json<DispatchRequest>>,
) -> Reply<DispatchReport> {
    user.require_admin()?;
    let limit = match body.and_then(|Json(request)| request.limit) {
        Some(limit) => limit,
        None => get_setting_i64(&state.db, "message_dispatch_batch_size", 50).await?,
    };

    let report = state
        .services
        .messaging
        .dispatch_pending(user.tenant_id, state.transport.as_ref(), limit)
        .await?;
    Ok(ok("Dispatch finished", report))
}

pub fn message_routes() -> Router<AppState> {
    Router::new()
        .route("/api/messages", get(list_messages))
        .route("/api/messages/templates", get(list_templates).put(save_template))
        .route("/api/messages/queue", post(queue_message))
        .route("/api/messages/dispatch", post(dispatch))
}
