//! Payment persistence

use chrono::{DateTime, Utc};
use lms_common::db::{Payment, PaymentStatus};
use lms_common::Result;
use sqlx::{SqliteExecutor, SqlitePool};

const PAYMENT_COLUMNS: &str = "id, tenant_id, enrollment_id, amount_cents, currency, status, \
     provider_reference, paid_at, created_at, updated_at";

pub async fn insert_payment<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    enrollment_id: i64,
    amount_cents: i64,
    currency: &str,
) -> Result<Payment> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO payments (
            tenant_id, enrollment_id, amount_cents, currency, status, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(tenant_id)
    .bind(enrollment_id)
    .bind(amount_cents)
    .bind(currency)
    .bind(PaymentStatus::Pending)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(Payment {
        id,
        tenant_id,
        enrollment_id,
        amount_cents,
        currency: currency.to_string(),
        status: PaymentStatus::Pending,
        provider_reference: None,
        paid_at: None,
        created_at: now,
        updated_at: now,
    })
}

pub async fn find_payment<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    id: i64,
) -> Result<Option<Payment>> {
    let payment = sqlx::query_as::<_, Payment>(&format!(
        "SELECT {} FROM payments WHERE tenant_id = ? AND id = ? AND is_deleted = 0",
        PAYMENT_COLUMNS
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(payment)
}

pub async fn find_pending_for_enrollment(pool: &SqlitePool, enrollment_id: i64) -> Result<Option<Payment>> {
    let payment = sqlx::query_as::<_, Payment>(&format!(
        "SELECT {} FROM payments WHERE enrollment_id = ? AND status = 'pending' AND is_deleted = 0",
        PAYMENT_COLUMNS
    ))
    .bind(enrollment_id)
    .fetch_optional(pool)
    .await?;
    Ok(payment)
}

pub async fn list_for_enrollment(pool: &SqlitePool, tenant_id: i64, enrollment_id: i64) -> Result<Vec<Payment>> {
    let payments = sqlx::query_as::<_, Payment>(&format!(
        "SELECT {} FROM payments WHERE tenant_id = ? AND enrollment_id = ? AND is_deleted = 0 \
         ORDER BY created_at, id",
        PAYMENT_COLUMNS
    ))
    .bind(tenant_id)
    .bind(enrollment_id)
    .fetch_all(pool)
    .await?;
    Ok(payments)
}

/// Fail every pending payment of an enrollment; returns how many changed
pub async fn fail_pending_for_enrollment<'e, E: SqliteExecutor<'e>>(executor: E, enrollment_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE payments SET status = ?, updated_at = ? WHERE enrollment_id = ? AND status = ? AND is_deleted = 0",
    )
    .bind(PaymentStatus::Failed)
    .bind(Utc::now())
    .bind(enrollment_id)
    .bind(PaymentStatus::Pending)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Move a payment from `from` to `to`; false when it was no longer in `from`
pub async fn transition<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
    from: PaymentStatus,
    to: PaymentStatus,
    provider_reference: Option<&str>,
    paid_at: Option<DateTime<Utc>>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = ?,
            provider_reference = COALESCE(?, provider_reference),
            paid_at = COALESCE(?, paid_at),
            updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(to)
    .bind(provider_reference)
    .bind(paid_at)
    .bind(Utc::now())
    .bind(id)
    .bind(from)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}
