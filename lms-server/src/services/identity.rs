//! Tenants, users and sessions

use super::{require_text, ServiceError, ServiceResult};
use crate::db::identity::{self as repo, NewUser};
use chrono::{DateTime, Duration, Utc};
use lms_common::api::{
    generate_salt, generate_session_token, hash_password, hash_token, is_valid_email,
    validate_password, verify_password,
};
use lms_common::db::init::{get_setting, get_setting_i64};
use lms_common::db::{Role, Tenant, User};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// The authenticated caller of a request
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub user_id: i64,
    pub tenant_id: i64,
    pub role: Role,
    pub email: String,
    pub display_name: String,
    pub locale: String,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Catalog and test authoring
    pub fn require_author(&self) -> ServiceResult<()> {
        if self.role.can_author() {
            Ok(())
        } else {
            Err(ServiceError::forbidden("Instructor or admin role required"))
        }
    }

    pub fn require_admin(&self) -> ServiceResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::forbidden("Admin role required"))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub tenant: String,
    pub email: String,
    pub password: String,
    pub display_name: String,
    #[serde(default)]
    pub locale: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub tenant: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Clone)]
pub struct IdentityService {
    db: SqlitePool,
}

impl IdentityService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create a tenant; slugs are lowercase `[a-z0-9-]`
    pub async fn create_tenant(
        &self,
        slug: &str,
        name: &str,
        default_locale: Option<&str>,
    ) -> ServiceResult<Tenant> {
        let slug = require_text(slug, "slug")?.to_lowercase();
        if !is_valid_slug(&slug) {
            return Err(ServiceError::bad_request(
                "Slug may only contain lowercase letters, digits and '-'",
            ));
        }
        let name = require_text(name, "name")?;

        let locale = match default_locale {
            Some(locale) => require_text(locale, "default_locale")?,
            None => get_setting(&self.db, "default_locale")
                .await?
                .unwrap_or_else(|| "en".to_string()),
        };

        if repo::find_tenant_by_slug(&self.db, &slug).await?.is_some() {
            return Err(ServiceError::conflict(format!("Tenant '{}' already exists", slug)));
        }

        let tenant = repo::insert_tenant(&self.db, &slug, &name, &locale).await?;
        info!(tenant_id = tenant.id, slug = %tenant.slug, "Tenant created");
        Ok(tenant)
    }

    pub async fn find_tenant(&self, slug: &str) -> ServiceResult<Tenant> {
        repo::find_tenant_by_slug(&self.db, &slug.trim().to_lowercase())
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Tenant '{}' not found", slug)))
    }

    pub async fn tenant(&self, tenant_id: i64) -> ServiceResult<Tenant> {
        repo::find_tenant(&self.db, tenant_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Tenant {} not found", tenant_id)))
    }

    /// Register a user; the first user of a tenant becomes its admin
    pub async fn register(&self, request: RegisterRequest) -> ServiceResult<User> {
        let tenant = self.find_tenant(&request.tenant).await?;

        let email = request.email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(ServiceError::bad_request(format!("Invalid email address: {}", email)));
        }
        let min_length = get_setting_i64(&self.db, "password_min_length", 8).await?;
        validate_password(&request.password, min_length.max(1) as usize)
            .map_err(|e| ServiceError::bad_request(e.to_string()))?;
        let display_name = require_text(&request.display_name, "display_name")?;

        if repo::find_user_by_email(&self.db, tenant.id, &email).await?.is_some() {
            return Err(ServiceError::conflict(format!("Email '{}' is already registered", email)));
        }

        let role = if repo::count_users(&self.db, tenant.id).await? == 0 {
            Role::Admin
        } else {
            Role::Student
        };

        let salt = generate_salt();
        let hash = hash_password(&request.password, &salt);
        let locale = request.locale.unwrap_or_else(|| tenant.default_locale.clone());

        let user_id = repo::insert_user(
            &self.db,
            &NewUser {
                tenant_id: tenant.id,
                email: &email,
                display_name: &display_name,
                role,
                locale: &locale,
                password_hash: &hash,
                password_salt: &salt,
            },
        )
        .await?;

        info!(tenant_id = tenant.id, user_id, role = %role, "User registered");

        repo::find_user(&self.db, tenant.id, user_id)
            .await?
            .ok_or_else(|| ServiceError::internal("Registered user vanished"))
    }

    pub async fn login(&self, request: LoginRequest) -> ServiceResult<LoginResponse> {
        let invalid = || ServiceError::unauthorized("Invalid email or password");

        let tenant = self.find_tenant(&request.tenant).await.map_err(|_| invalid())?;
        let email = request.email.trim().to_lowercase();

        let user = repo::find_user_by_email(&self.db, tenant.id, &email)
            .await?
            .ok_or_else(invalid)?;

        if !verify_password(&request.password, &user.password_salt, &user.password_hash) {
            warn!(tenant_id = tenant.id, user_id = user.id, "Failed login");
            return Err(invalid());
        }

        let ttl_hours = get_setting_i64(&self.db, "session_ttl_hours", 168).await?;
        let now = Utc::now();
        let expires_at = now + Duration::hours(ttl_hours.max(1));
        let token = generate_session_token();

        repo::purge_expired_sessions(&self.db, user.id, now).await?;
        repo::insert_session(&self.db, tenant.id, user.id, &hash_token(&token), expires_at).await?;
        repo::touch_last_login(&self.db, user.id).await?;

        info!(tenant_id = tenant.id, user_id = user.id, "User logged in");

        Ok(LoginResponse {
            token,
            expires_at,
            user,
        })
    }

    pub async fn logout(&self, token: &str) -> ServiceResult<()> {
        if repo::delete_session(&self.db, &hash_token(token)).await? {
            Ok(())
        } else {
            Err(ServiceError::unauthorized("Unknown session"))
        }
    }

    /// Resolve a bearer token to its user
    pub async fn authenticate(&self, token: &str) -> ServiceResult<CurrentUser> {
        let session = repo::find_session_user(&self.db, &hash_token(token))
            .await?
            .ok_or_else(|| ServiceError::unauthorized("Invalid or expired session"))?;

        if session.expires_at <= Utc::now() {
            repo::delete_session(&self.db, &hash_token(token)).await?;
            return Err(ServiceError::unauthorized("Invalid or expired session"));
        }

        Ok(CurrentUser {
            user_id: session.user_id,
            tenant_id: session.tenant_id,
            role: session.role,
            email: session.email,
            display_name: session.display_name,
            locale: session.locale,
        })
    }

    pub async fn profile(&self, user: &CurrentUser) -> ServiceResult<User> {
        repo::find_user(&self.db, user.tenant_id, user.user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("User not found"))
    }
}

fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
