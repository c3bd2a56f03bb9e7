//! Server-Sent Events relay of the event bus

use crate::services::CurrentUser;
use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Extension, Router,
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events
///
/// Streams the caller's tenant events; see `LmsEvent` for the payloads.
pub async fn event_stream(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    lms_common::sse::create_tenant_event_stream(&state.event_bus, user.tenant_id)
}

pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}
