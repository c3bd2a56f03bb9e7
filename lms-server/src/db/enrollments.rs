//! Enrollment persistence

use chrono::{DateTime, Utc};
use lms_common::db::{Enrollment, EnrollmentStatus};
use lms_common::Result;
use sqlx::{SqliteExecutor, SqlitePool};

const ENROLLMENT_COLUMNS: &str = "id, tenant_id, user_id, program_id, status, enrolled_at, \
     completed_at, progress_percent, created_at, updated_at";

pub async fn insert_enrollment<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    user_id: i64,
    program_id: i64,
    status: EnrollmentStatus,
) -> Result<Enrollment> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO enrollments (
            tenant_id, user_id, program_id, status, enrolled_at,
            progress_percent, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(program_id)
    .bind(status)
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(Enrollment {
        id,
        tenant_id,
        user_id,
        program_id,
        status,
        enrolled_at: now,
        completed_at: None,
        progress_percent: 0,
        created_at: now,
        updated_at: now,
    })
}

pub async fn find_enrollment<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    id: i64,
) -> Result<Option<Enrollment>> {
    let enrollment = sqlx::query_as::<_, Enrollment>(&format!(
        "SELECT {} FROM enrollments WHERE tenant_id = ? AND id = ? AND is_deleted = 0",
        ENROLLMENT_COLUMNS
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(enrollment)
}

/// The user's enrollment in a program that is not cancelled, if any
pub async fn find_open_enrollment<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    user_id: i64,
    program_id: i64,
) -> Result<Option<Enrollment>> {
    let enrollment = sqlx::query_as::<_, Enrollment>(&format!(
        "SELECT {} FROM enrollments \
         WHERE tenant_id = ? AND user_id = ? AND program_id = ? \
           AND status != 'cancelled' AND is_deleted = 0",
        ENROLLMENT_COLUMNS
    ))
    .bind(tenant_id)
    .bind(user_id)
    .bind(program_id)
    .fetch_optional(executor)
    .await?;
    Ok(enrollment)
}

pub async fn list_for_user(pool: &SqlitePool, tenant_id: i64, user_id: i64) -> Result<Vec<Enrollment>> {
    let enrollments = sqlx::query_as::<_, Enrollment>(&format!(
        "SELECT {} FROM enrollments \
         WHERE tenant_id = ? AND user_id = ? AND is_deleted = 0 \
         ORDER BY enrolled_at DESC, id DESC",
        ENROLLMENT_COLUMNS
    ))
    .bind(tenant_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(enrollments)
}

pub async fn set_status<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
    status: EnrollmentStatus,
) -> Result<()> {
    sqlx::query("UPDATE enrollments SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn set_progress<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
    progress_percent: i64,
) -> Result<()> {
    sqlx::query("UPDATE enrollments SET progress_percent = ?, updated_at = ? WHERE id = ?")
        .bind(progress_percent)
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn mark_completed<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
    completed_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE enrollments
        SET status = 'completed', completed_at = ?, progress_percent = 100, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(completed_at)
    .bind(completed_at)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(())
}
