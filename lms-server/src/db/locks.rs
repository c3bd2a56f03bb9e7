//! Named lock rows

use chrono::Utc;
use lms_common::Result;
use sqlx::SqlitePool;

/// Take the lock when free, expired or already ours; true on success
///
/// A single UPSERT so that two contenders cannot both win.
pub async fn try_acquire(
    pool: &SqlitePool,
    name: &str,
    owner: &str,
    now_ms: i64,
    expires_at_ms: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO distributed_locks (name, owner, expires_at_ms, acquired_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (name) DO UPDATE SET
            owner = excluded.owner,
            expires_at_ms = excluded.expires_at_ms,
            acquired_at = excluded.acquired_at
        WHERE distributed_locks.owner = excluded.owner
           OR distributed_locks.expires_at_ms <= ?
        "#,
    )
    .bind(name)
    .bind(owner)
    .bind(expires_at_ms)
    .bind(Utc::now())
    .bind(now_ms)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn release(pool: &SqlitePool, name: &str, owner: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM distributed_locks WHERE name = ? AND owner = ?")
        .bind(name)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn current_owner(pool: &SqlitePool, name: &str, now_ms: i64) -> Result<Option<String>> {
    let owner = sqlx::query_scalar(
        "SELECT owner FROM distributed_locks WHERE name = ? AND expires_at_ms > ?",
    )
    .bind(name)
    .bind(now_ms)
    .fetch_optional(pool)
    .await?;
    Ok(owner)
}
