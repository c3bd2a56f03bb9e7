//! Tenant, user and session persistence

use chrono::{DateTime, Utc};
use lms_common::db::{Role, Tenant, User};
use lms_common::Result;
use sqlx::{FromRow, SqliteExecutor, SqlitePool};

const TENANT_COLUMNS: &str = "id, slug, name, default_locale, created_at, updated_at";

const USER_COLUMNS: &str = "id, tenant_id, email, display_name, role, locale, password_hash, \
     password_salt, last_login_at, created_at, updated_at";

pub async fn insert_tenant(
    pool: &SqlitePool,
    slug: &str,
    name: &str,
    default_locale: &str,
) -> Result<Tenant> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO tenants (slug, name, default_locale, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(slug)
    .bind(name)
    .bind(default_locale)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(Tenant {
        id,
        slug: slug.to_string(),
        name: name.to_string(),
        default_locale: default_locale.to_string(),
        created_at: now,
        updated_at: now,
    })
}

pub async fn find_tenant_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<Tenant>> {
    let tenant = sqlx::query_as::<_, Tenant>(&format!(
        "SELECT {} FROM tenants WHERE slug = ? AND is_deleted = 0",
        TENANT_COLUMNS
    ))
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    Ok(tenant)
}

pub async fn find_tenant<'e, E: SqliteExecutor<'e>>(executor: E, id: i64) -> Result<Option<Tenant>> {
    let tenant = sqlx::query_as::<_, Tenant>(&format!(
        "SELECT {} FROM tenants WHERE id = ? AND is_deleted = 0",
        TENANT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(tenant)
}

/// Fields for a new user row
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub tenant_id: i64,
    pub email: &'a str,
    pub display_name: &'a str,
    pub role: Role,
    pub locale: &'a str,
    pub password_hash: &'a str,
    pub password_salt: &'a str,
}

pub async fn insert_user<'e, E: SqliteExecutor<'e>>(executor: E, user: &NewUser<'_>) -> Result<i64> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO users (
            tenant_id, email, display_name, role, locale,
            password_hash, password_salt, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user.tenant_id)
    .bind(user.email)
    .bind(user.display_name)
    .bind(user.role)
    .bind(user.locale)
    .bind(user.password_hash)
    .bind(user.password_salt)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn find_user<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    id: i64,
) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE tenant_id = ? AND id = ? AND is_deleted = 0",
        USER_COLUMNS
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(user)
}

pub async fn find_user_by_email(
    pool: &SqlitePool,
    tenant_id: i64,
    email: &str,
) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE tenant_id = ? AND email = ? AND is_deleted = 0",
        USER_COLUMNS
    ))
    .bind(tenant_id)
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn count_users(pool: &SqlitePool, tenant_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE tenant_id = ?")
        .bind(tenant_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn touch_last_login(pool: &SqlitePool, user_id: i64) -> Result<()> {
    let now = Utc::now();
    sqlx::query("UPDATE users SET last_login_at = ?, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(now)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_session(
    pool: &SqlitePool,
    tenant_id: i64,
    user_id: i64,
    token_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sessions (tenant_id, user_id, token_hash, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(token_hash)
    .bind(expires_at)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Session joined with its (non-deleted) user
#[derive(Debug, Clone, FromRow)]
pub struct SessionUser {
    pub user_id: i64,
    pub tenant_id: i64,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub locale: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn find_session_user(pool: &SqlitePool, token_hash: &str) -> Result<Option<SessionUser>> {
    let row = sqlx::query_as::<_, SessionUser>(
        r#"
        SELECT u.id AS user_id, u.tenant_id, u.email, u.display_name, u.role, u.locale,
               s.expires_at
        FROM sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token_hash = ? AND u.is_deleted = 0
        "#,
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn delete_session(pool: &SqlitePool, token_hash: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
        .bind(token_hash)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove a user's expired sessions
pub async fn purge_expired_sessions(pool: &SqlitePool, user_id: i64, now: DateTime<Utc>) -> Result<u64> {
    let sessions: Vec<(i64, DateTime<Utc>)> =
        sqlx::query_as("SELECT id, expires_at FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(pool)
            .await?;

    let mut removed = 0;
    for (id, expires_at) in sessions {
        if expires_at <= now {
            sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await?;
            removed += 1;
        }
    }
    Ok(removed)
}
