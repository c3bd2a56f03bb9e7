//! Lesson completion rows and roll-up counts

use chrono::{DateTime, Utc};
use lms_common::Result;
use sqlx::SqliteExecutor;

/// Record a completed lesson; returns false when it was already recorded
pub async fn insert_lesson_completion<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    user_id: i64,
    lesson_id: i64,
    completed_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO lesson_progress (
            tenant_id, user_id, lesson_id, completed_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (user_id, lesson_id) DO NOTHING
        "#,
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(lesson_id)
    .bind(completed_at)
    .bind(completed_at)
    .bind(completed_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Completed and total live lessons of a course, for one user
pub async fn course_counts<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    user_id: i64,
    course_id: i64,
) -> Result<(i64, i64)> {
    let counts: (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(lp.id) AS completed,
            COUNT(l.id) AS total
        FROM lessons l
        LEFT JOIN lesson_progress lp
            ON lp.lesson_id = l.id AND lp.user_id = ? AND lp.is_deleted = 0
        WHERE l.tenant_id = ? AND l.course_id = ? AND l.is_deleted = 0
        "#,
    )
    .bind(user_id)
    .bind(tenant_id)
    .bind(course_id)
    .fetch_one(executor)
    .await?;
    Ok(counts)
}

/// Completed and total live lessons across a program's live courses, for one user
pub async fn program_counts<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    user_id: i64,
    program_id: i64,
) -> Result<(i64, i64)> {
    let counts: (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(lp.id) AS completed,
            COUNT(l.id) AS total
        FROM courses c
        JOIN lessons l ON l.course_id = c.id AND l.is_deleted = 0
        LEFT JOIN lesson_progress lp
            ON lp.lesson_id = l.id AND lp.user_id = ? AND lp.is_deleted = 0
        WHERE c.tenant_id = ? AND c.program_id = ? AND c.is_deleted = 0
        "#,
    )
    .bind(user_id)
    .bind(tenant_id)
    .bind(program_id)
    .fetch_one(executor)
    .await?;
    Ok(counts)
}

/// Integer percentage, rounded down; an empty set counts as 0
pub fn percent(completed: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    (completed * 100) / total
}
