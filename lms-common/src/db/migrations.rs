//! Database schema migrations
//!
//! Versioned, idempotent migrations tracked in the `schema_version` table.
//! They run after the base schema so that databases created by older
//! releases are brought forward without data loss.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations**; add a new one per schema change
//! 2. **Check before altering** so that a migration is safe to re-run
//! 3. **Prefer ALTER TABLE** over DROP/CREATE to preserve data

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Get current schema version from database (0 when untracked)
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    if current_version < 3 {
        migrate_v3(pool).await?;
        set_schema_version(pool, 3).await?;
        info!("Migration v3 completed");
    }

    Ok(())
}

async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = ?",
        table
    ))
    .bind(column)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Migration v1: track last successful login per user
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    if !column_exists(pool, "users", "last_login_at").await? {
        sqlx::query("ALTER TABLE users ADD COLUMN last_login_at TEXT")
            .execute(pool)
            .await?;
        info!("Migration v1: Added last_login_at to users");
    }
    Ok(())
}

/// Migration v2: index the outbox by status for dispatch scans
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_outbound_messages_status ON outbound_messages (tenant_id, status)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Migration v3: remember who started each import run
async fn migrate_v3(pool: &SqlitePool) -> Result<()> {
    if !column_exists(pool, "import_runs", "user_id").await? {
        sqlx::query("ALTER TABLE import_runs ADD COLUMN user_id INTEGER")
            .execute(pool)
            .await?;
        info!("Migration v3: Added user_id to import_runs");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;

    #[tokio::test]
    async fn test_fresh_database_reaches_current_version() {
        let pool = init_memory_database().await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
        assert!(column_exists(&pool, "users", "last_login_at").await.unwrap());
        assert!(column_exists(&pool, "import_runs", "user_id").await.unwrap());
    }

    #[tokio::test]
    async fn test_migrations_rerun_safely() {
        let pool = init_memory_database().await.unwrap();
        sqlx::query("DELETE FROM schema_version").execute(&pool).await.unwrap();

        run_migrations(&pool).await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
    }
}
