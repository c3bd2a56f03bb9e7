//! Translations with locale fallback
//!
//! Lookups walk `xx-YY`, then `xx`, then the tenant's default locale, and
//! finally answer with the key itself.

use super::{require_text, CurrentUser, ServiceError, ServiceResult};
use crate::db::{identity, translations as repo};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct TranslationInput {
    pub locale: String,
    pub key: String,
    pub value: String,
}

/// Locales to try, most specific first, without duplicates
pub fn fallback_chain(locale: &str, default_locale: &str) -> Vec<String> {
    let mut chain: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        if !candidate.is_empty() && !chain.iter().any(|c| c == candidate) {
            chain.push(candidate.to_string());
        }
    };

    let locale = locale.trim();
    push(locale);
    if let Some((language, _)) = locale.split_once('-') {
        push(language);
    }
    push(default_locale.trim());
    chain
}

/// `xx` or `xx-YY` style tags
pub fn is_valid_locale(locale: &str) -> bool {
    let mut parts = locale.split('-');
    let language_ok = parts
        .next()
        .map(|l| (2..=3).contains(&l.len()) && l.chars().all(|c| c.is_ascii_alphabetic()))
        .unwrap_or(false);
    let region_ok = parts.all(|p| (2..=8).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphanumeric()));
    language_ok && region_ok
}

#[derive(Clone)]
pub struct LocalizationService {
    db: SqlitePool,
}

impl LocalizationService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn set_translation(&self, user: &CurrentUser, input: TranslationInput) -> ServiceResult<()> {
        user.require_admin()?;
        let locale = require_text(&input.locale, "locale")?;
        if !is_valid_locale(&locale) {
            return Err(ServiceError::bad_request(format!("Invalid locale '{}'", locale)));
        }
        let key = require_text(&input.key, "key")?;

        repo::upsert_translation(&self.db, user.tenant_id, &locale, &key, &input.value).await?;
        info!(tenant_id = user.tenant_id, locale = %locale, key = %key, "Translation saved");
        Ok(())
    }

    pub async fn delete_translation(&self, user: &CurrentUser, locale: &str, key: &str) -> ServiceResult<()> {
        user.require_admin()?;
        if !repo::delete_translation(&self.db, user.tenant_id, locale, key).await? {
            return Err(ServiceError::not_found(format!("No translation '{}' for '{}'", key, locale)));
        }
        Ok(())
    }

    pub async fn translate(&self, tenant_id: i64, locale: &str, key: &str) -> ServiceResult<String> {
        let default_locale = self.default_locale(tenant_id).await?;
        for candidate in fallback_chain(locale, &default_locale) {
            if let Some(value) = repo::find_value(&self.db, tenant_id, &candidate, key).await? {
                return Ok(value);
            }
        }
        Ok(key.to_string())
    }

    /// Every key visible in `locale`, more specific locales winning
    pub async fn bundle(&self, tenant_id: i64, locale: &str) -> ServiceResult<BTreeMap<String, String>> {
        let default_locale = self.default_locale(tenant_id).await?;
        let mut bundle = BTreeMap::new();

        // Least specific first so that later inserts override
        for candidate in fallback_chain(locale, &default_locale).iter().rev() {
            for row in repo::list_for_locale(&self.db, tenant_id, candidate).await? {
                bundle.insert(row.key, row.value);
            }
        }
        Ok(bundle)
    }

    async fn default_locale(&self, tenant_id: i64) -> ServiceResult<String> {
        Ok(identity::find_tenant(&self.db, tenant_id)
            .await?
            .map(|t| t.default_locale)
            .unwrap_or_else(|| "en".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::fixture;
    use lms_common::api::ErrorKind;

    #[test]
    fn test_fallback_chain() {
        assert_eq!(fallback_chain("de-AT", "en"), vec!["de-AT", "de", "en"]);
        assert_eq!(fallback_chain("en", "en"), vec!["en"]);
        assert_eq!(fallback_chain("en-GB", "en"), vec!["en-GB", "en"]);
    }

    #[test]
    fn test_locale_shape() {
        assert!(is_valid_locale("en"));
        assert!(is_valid_locale("pt-BR"));
        assert!(!is_valid_locale("english"));
        assert!(!is_valid_locale("e"));
    }

    fn input(locale: &str, key: &str, value: &str) -> TranslationInput {
        TranslationInput {
            locale: locale.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    #[tokio::test]
    async fn test_translate_falls_back() {
        let fx = fixture().await;
        let l10n = &fx.localization;
        l10n.set_translation(&fx.admin, input("en", "greeting", "Hello")).await.unwrap();
        l10n.set_translation(&fx.admin, input("de", "greeting", "Hallo")).await.unwrap();
        l10n.set_translation(&fx.admin, input("de-AT", "greeting", "Servus")).await.unwrap();
        l10n.set_translation(&fx.admin, input("en", "farewell", "Bye")).await.unwrap();

        assert_eq!(l10n.translate(fx.tenant_id, "de-AT", "greeting").await.unwrap(), "Servus");
        assert_eq!(l10n.translate(fx.tenant_id, "de-CH", "greeting").await.unwrap(), "Hallo");
        assert_eq!(l10n.translate(fx.tenant_id, "fr", "greeting").await.unwrap(), "Hello");
        assert_eq!(l10n.translate(fx.tenant_id, "de", "farewell").await.unwrap(), "Bye");
        assert_eq!(l10n.translate(fx.tenant_id, "de", "missing.key").await.unwrap(), "missing.key");

        let bundle = l10n.bundle(fx.tenant_id, "de-AT").await.unwrap();
        assert_eq!(bundle["greeting"], "Servus");
        assert_eq!(bundle["farewell"], "Bye");
    }

    #[tokio::test]
    async fn test_only_admins_translate() {
        let fx = fixture().await;
        let err = fx
            .localization
            .set_translation(&fx.student, input("en", "k", "v"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }
}
