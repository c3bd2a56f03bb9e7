//! Payments

use crate::error::{created, ok};
use crate::services::CurrentUser;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use lms_common::api::ApiEnvelope;
use lms_common::db::Payment;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub enrollment_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkPaidRequest {
    #[serde(default)]
    pub reference: String,
}

type Reply<T> = ApiResult<Json<ApiEnvelope<T>>>;

pub async fn create_payment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CreatePaymentRequest>,
) -> ApiResult<(StatusCode, Json<ApiEnvelope<Payment>>)> {
    let payment = state
        .services
        .payments
        .create_payment(&user, request.enrollment_id)
        .await?;
    Ok(created("Payment created", payment))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Reply<Payment> {
    Ok(ok("Payment", state.services.payments.get(&user, id).await?))
}

pub async fn list_enrollment_payments(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(enrollment_id): Path<i64>,
) -> Reply<Vec<Payment>> {
    let payments = state
        .services
        .payments
        .list_for_enrollment(&user, enrollment_id)
        .await?;
    Ok(ok("Payments", payments))
}

pub async fn mark_paid(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(request): Json<MarkPaidRequest>,
) -> Reply<Payment> {
    let payment = state.services.payments.mark_paid(&user, id, &request.reference).await?;
    Ok(ok("Payment marked paid", payment))
}

pub async fn mark_failed(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Reply<Payment> {
    let payment = state.services.payments.mark_failed(&user, id).await?;
    Ok(ok("Payment marked failed", payment))
}

pub async fn refund(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Reply<Payment> {
    let payment = state.services.payments.refund(&user, id).await?;
    Ok(ok("Payment refunded", payment))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments", post(create_payment))
        .route("/api/payments/:id", get(get_payment))
        .route("/api/payments/:id/paid", post(mark_paid))
        .route("/api/payments/:id/failed", post(mark_failed))
        .route("/api/payments/:id/refund", post(refund))
        .route("/api/enrollments/:id/payments", get(list_enrollment_payments))
}
