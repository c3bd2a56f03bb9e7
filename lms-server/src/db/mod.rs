//! Database access for lms-server
//!
//! Plain async functions over `sqlx`. Functions used inside multi-table
//! transactions take any [`sqlx::SqliteExecutor`] so they run against a
//! pool or an open transaction alike. All reads are tenant-scoped and skip
//! soft-deleted rows.

pub mod catalog;
pub mod certificates;
pub mod enrollments;
pub mod identity;
pub mod import_runs;
pub mod locks;
pub mod messages;
pub mod payments;
pub mod progress;
pub mod quizzes;
pub mod translations;

use anyhow::Result;
use lms_common::config::RootFolderInitializer;
use sqlx::SqlitePool;

/// Open (creating if needed) the database inside the root folder
pub async fn open_database(initializer: &RootFolderInitializer) -> Result<SqlitePool> {
    initializer.ensure_directory_exists()?;
    let db_path = initializer.database_path();
    if initializer.database_exists() {
        tracing::debug!("Connecting to database: {}", db_path.display());
    } else {
        tracing::info!("Creating new database: {}", db_path.display());
    }

    let pool = lms_common::db::init::init_database(&db_path).await?;
    Ok(pool)
}
