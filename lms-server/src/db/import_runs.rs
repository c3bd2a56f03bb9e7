//! Import run history

use chrono::{DateTime, Utc};
use lms_common::db::ImportRun;
use lms_common::Result;
use sqlx::types::Json;
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct NewImportRun<'a> {
    pub tenant_id: i64,
    pub user_id: Option<i64>,
    pub entity: &'a str,
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub messages: &'a [String],
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub async fn insert_run(pool: &SqlitePool, run: &NewImportRun<'_>) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO import_runs (
            tenant_id, user_id, entity, added, updated, skipped, failed,
            messages, dry_run, started_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run.tenant_id)
    .bind(run.user_id)
    .bind(run.entity)
    .bind(run.added as i64)
    .bind(run.updated as i64)
    .bind(run.skipped as i64)
    .bind(run.failed as i64)
    .bind(Json(run.messages))
    .bind(run.dry_run)
    .bind(run.started_at)
    .bind(run.finished_at)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn list_runs(pool: &SqlitePool, tenant_id: i64, limit: i64, offset: i64) -> Result<Vec<ImportRun>> {
    let runs = sqlx::query_as::<_, ImportRun>(
        r#"
        SELECT id, tenant_id, entity, added, updated, skipped, failed, messages,
               dry_run, user_id, started_at, finished_at
        FROM import_runs
        WHERE tenant_id = ?
        ORDER BY started_at DESC, id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(tenant_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(runs)
}

pub async fn count_runs(pool: &SqlitePool, tenant_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM import_runs WHERE tenant_id = ?")
        .bind(tenant_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
