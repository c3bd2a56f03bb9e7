//! On-disk database initialization

use lms_common::db::init::{get_setting_i64, init_database};
use lms_common::db::migrations::{get_schema_version, CURRENT_SCHEMA_VERSION};

#[tokio::test]
async fn test_database_created_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("lms.db");

    let pool = init_database(&db_path).await.unwrap();

    assert!(db_path.exists(), "Database file was not created");
    assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn test_reopening_existing_database_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("lms.db");

    let pool = init_database(&db_path).await.unwrap();
    sqlx::query("UPDATE settings SET value = '17' WHERE key = 'import_max_batch_size'")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    let value = get_setting_i64(&pool, "import_max_batch_size", 0).await.unwrap();
    assert_eq!(value, 17);
}

#[tokio::test]
async fn test_audit_columns_present_on_entity_tables() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("lms.db")).await.unwrap();

    for table in ["programs", "courses", "lessons", "users", "enrollments", "payments"] {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM pragma_table_info('{}') \
             WHERE name IN ('created_at', 'updated_at', 'is_deleted', 'deleted_at')",
            table
        ))
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 4, "table {} is missing audit columns", table);
    }
}
