//! Translation persistence

use chrono::Utc;
use lms_common::db::Translation;
use lms_common::Result;
use sqlx::{SqliteExecutor, SqlitePool};

pub async fn upsert_translation<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    locale: &str,
    key: &str,
    value: &str,
) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO translations (tenant_id, locale, key, value, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (tenant_id, locale, key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at,
            is_deleted = 0,
            deleted_at = NULL
        "#,
    )
    .bind(tenant_id)
    .bind(locale)
    .bind(key)
    .bind(value)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn find_value(pool: &SqlitePool, tenant_id: i64, locale: &str, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar(
        "SELECT value FROM translations \
         WHERE tenant_id = ? AND locale = ? AND key = ? AND is_deleted = 0",
    )
    .bind(tenant_id)
    .bind(locale)
    .bind(key)
    .fetch_optional(pool)
    .await?;
    Ok(value)
}

pub async fn list_for_locale(pool: &SqlitePool, tenant_id: i64, locale: &str) -> Result<Vec<Translation>> {
    let rows = sqlx::query_as::<_, Translation>(
        "SELECT id, tenant_id, locale, key, value FROM translations \
         WHERE tenant_id = ? AND locale = ? AND is_deleted = 0 ORDER BY key",
    )
    .bind(tenant_id)
    .bind(locale)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn delete_translation(pool: &SqlitePool, tenant_id: i64, locale: &str, key: &str) -> Result<bool> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE translations SET is_deleted = 1, deleted_at = ?, updated_at = ? \
         WHERE tenant_id = ? AND locale = ? AND key = ? AND is_deleted = 0",
    )
    .bind(now)
    .bind(now)
    .bind(tenant_id)
    .bind(locale)
    .bind(key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
