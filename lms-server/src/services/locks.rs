//! Database-backed named locks
//!
//! A lock is a row in `distributed_locks` keyed by name, owned by a
//! random owner id and valid until `expires_at_ms`. Expired rows are taken
//! over by the next contender, so a crashed holder blocks others for at
//! most one TTL.

use super::{ServiceError, ServiceResult};
use crate::db::locks as repo;
use lms_common::db::init::get_setting_i64;
use lms_common::time::now_millis;
use sqlx::SqlitePool;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct LockService {
    db: SqlitePool,
}

impl LockService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Take `name` for `owner`; false when someone else holds it
    ///
    /// Re-acquiring a lock already held by `owner` refreshes its expiry.
    pub async fn try_acquire(&self, name: &str, owner: &str, ttl: Duration) -> ServiceResult<bool> {
        let now = now_millis();
        let expires_at = now + ttl.as_millis() as i64;
        let acquired = repo::try_acquire(&self.db, name, owner, now, expires_at).await?;
        debug!(lock = name, owner, acquired, "Lock acquire attempt");
        Ok(acquired)
    }

    /// Release `name` if `owner` holds it
    pub async fn release(&self, name: &str, owner: &str) -> ServiceResult<bool> {
        Ok(repo::release(&self.db, name, owner).await?)
    }

    /// Current unexpired holder of `name`
    pub async fn holder(&self, name: &str) -> ServiceResult<Option<String>> {
        Ok(repo::current_owner(&self.db, name, now_millis()).await?)
    }

    /// Run `f` while holding `name`
    ///
    /// Waits up to `database_max_lock_wait_ms`, polling every
    /// `database_lock_retry_ms`; still contended after that is a Conflict.
    /// The lock is released whether `f` succeeds or fails.
    pub async fn with_lock<F, Fut, T>(&self, name: &str, ttl: Duration, f: F) -> ServiceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let owner = Uuid::new_v4().to_string();
        let max_wait = get_setting_i64(&self.db, "database_max_lock_wait_ms", 5000).await?;
        let retry_every = get_setting_i64(&self.db, "database_lock_retry_ms", 250).await?;

        let started = Instant::now();
        while !self.try_acquire(name, &owner, ttl).await? {
            if started.elapsed() >= Duration::from_millis(max_wait.max(0) as u64) {
                warn!(lock = name, waited_ms = started.elapsed().as_millis() as u64, "Lock contention");
                return Err(ServiceError::conflict(format!("'{}' is busy, try again later", name)));
            }
            tokio::time::sleep(Duration::from_millis(retry_every.max(1) as u64)).await;
        }

        let result = f().await;

        if let Err(e) = self.release(name, &owner).await {
            warn!(lock = name, error = %e, "Failed to release lock; it will expire");
        }

        result
    }

    /// Default TTL from settings
    pub async fn default_ttl(&self) -> ServiceResult<Duration> {
        let ms = get_setting_i64(&self.db, "lock_default_ttl_ms", 30_000).await?;
        Ok(Duration::from_millis(ms.max(1) as u64))
    }
}
