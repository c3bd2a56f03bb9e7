//! Templated email/SMS messages and the outbound queue
//!
//! Messages are rendered from templates into the `outbound_messages`
//! table and later handed to a [`MessageTransport`]. Only a logging
//! transport ships with the server; real gateways plug in behind the trait.

use super::localization::fallback_chain;
use super::{require_text, CurrentUser, LockService, ServiceError, ServiceResult};
use crate::db::{identity, messages as repo};
use async_trait::async_trait;
use lms_common::api::is_valid_email;
use lms_common::db::{Channel, MessageStatus, MessageTemplate, OutboundMessage};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Delivery seam for queued messages
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;
}

/// Writes messages to the log instead of delivering them
#[derive(Debug, Default, Clone)]
pub struct LogTransport {
    /// Sender shown in the log line (`[mail] from_address`)
    pub from_address: String,
}

impl LogTransport {
    pub fn new(from_address: impl Into<String>) -> Self {
        Self {
            from_address: from_address.into(),
        }
    }
}

#[async_trait]
impl MessageTransport for LogTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        info!(
            message_id = message.id,
            from = %self.from_address,
            channel = %message.channel,
            recipient = %message.recipient,
            subject = %message.subject,
            "Message delivered to log transport"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateInput {
    pub code: String,
    pub locale: String,
    pub channel: Channel,
    #[serde(default)]
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueRequest {
    pub code: String,
    pub channel: Channel,
    #[serde(default)]
    pub locale: Option<String>,
    pub recipient: String,
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
}

/// Replace `{{name}}` placeholders; unknown names render empty
pub fn render_template(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                if let Some(value) = vars.get(name) {
                    out.push_str(value);
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated placeholder is kept verbatim
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Check a recipient address for the channel
pub fn validate_recipient(channel: Channel, recipient: &str) -> ServiceResult<String> {
    let recipient = recipient.trim();
    let valid = match channel {
        Channel::Email => is_valid_email(recipient),
        Channel::Sms => {
            let digits = recipient.chars().skip(1).filter(|c| c.is_ascii_digit()).count();
            recipient.starts_with('+')
                && recipient
                    .chars()
                    .skip(1)
                    .all(|c| c.is_ascii_digit() || c == ' ' || c == '-')
                && (7..=15).contains(&digits)
        }
    };

    if valid {
        Ok(recipient.to_string())
    } else {
        Err(ServiceError::bad_request(format!(
            "Invalid {} recipient '{}'",
            channel, recipient
        )))
    }
}

#[derive(Clone)]
pub struct MessagingService {
    db: SqlitePool,
    locks: LockService,
}

impl MessagingService {
    pub fn new(db: SqlitePool, locks: LockService) -> Self {
        Self { db, locks }
    }

    pub async fn save_template(&self, user: &CurrentUser, input: TemplateInput) -> ServiceResult<MessageTemplate> {
        user.require_admin()?;
        let code = require_text(&input.code, "code")?;
        let locale = require_text(&input.locale, "locale")?;
        let body = require_text(&input.body, "body")?;
        if input.channel == Channel::Email && input.subject.trim().is_empty() {
            return Err(ServiceError::bad_request("Email templates need a subject"));
        }

        let template = repo::upsert_template(
            &self.db,
            user.tenant_id,
            &code,
            &locale,
            input.channel,
            input.subject.trim(),
            &body,
        )
        .await?;
        info!(tenant_id = user.tenant_id, code = %code, locale = %locale, "Message template saved");
        Ok(template)
    }

    pub async fn list_templates(&self, user: &CurrentUser) -> ServiceResult<Vec<MessageTemplate>> {
        user.require_admin()?;
        Ok(repo::list_templates(&self.db, user.tenant_id).await?)
    }

    /// Render a template and queue the result
    pub async fn queue_templated(&self, tenant_id: i64, request: QueueRequest) -> ServiceResult<OutboundMessage> {
        let recipient = validate_recipient(request.channel, &request.recipient)?;
        let tenant = identity::find_tenant(&self.db, tenant_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Tenant {} not found", tenant_id)))?;

        let locale = request.locale.unwrap_or_else(|| tenant.default_locale.clone());
        let template = self
            .resolve_template(tenant_id, &request.code, &locale, &tenant.default_locale, request.channel)
            .await?;

        let subject = render_template(&template.subject, &request.vars);
        let body = render_template(&template.body, &request.vars);

        let message = repo::enqueue(&self.db, tenant_id, request.channel, &recipient, &subject, &body).await?;
        info!(
            tenant_id,
            message_id = message.id,
            code = %request.code,
            locale = %template.locale,
            "Message queued"
        );
        Ok(message)
    }

    pub async fn list_messages(
        &self,
        user: &CurrentUser,
        status: Option<MessageStatus>,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<Vec<OutboundMessage>> {
        user.require_admin()?;
        Ok(repo::list_messages(&self.db, user.tenant_id, status, limit, offset).await?)
    }

    /// Send up to `limit` queued messages
    ///
    /// Each failure is logged and stored on its row; the batch carries on
    /// and the first failure is returned at the end. One dispatch per
    /// tenant runs at a time, so a queued message is sent at most once.
    pub async fn dispatch_pending(
        &self,
        tenant_id: i64,
        transport: &dyn MessageTransport,
        limit: i64,
    ) -> ServiceResult<DispatchReport> {
        let lock_name = format!("dispatch:{}", tenant_id);
        let ttl = self.locks.default_ttl().await?;
        self.locks
            .with_lock(&lock_name, ttl, || self.send_queued(tenant_id, transport, limit))
            .await
    }

    async fn send_queued(
        &self,
        tenant_id: i64,
        transport: &dyn MessageTransport,
        limit: i64,
    ) -> ServiceResult<DispatchReport> {
        let queued = repo::list_queued(&self.db, tenant_id, limit.max(1)).await?;
        let mut report = DispatchReport::default();
        let mut first_failure: Option<ServiceError> = None;

        for message in queued {
            match transport.send(&message).await {
                Ok(()) => {
                    repo::mark_sent(&self.db, message.id).await?;
                    report.sent += 1;
                }
                Err(e) => {
                    error!(
                        tenant_id,
                        message_id = message.id,
                        recipient = %message.recipient,
                        error = %e,
                        "Message dispatch failed"
                    );
                    repo::mark_failed(&self.db, message.id, &e.to_string()).await?;
                    report.failed += 1;
                    first_failure.get_or_insert_with(|| {
                        ServiceError::internal(format!("Message {} failed: {}", message.id, e))
                    });
                }
            }
        }

        info!(tenant_id, sent = report.sent, failed = report.failed, "Dispatch finished");

        match first_failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    async fn resolve_template(
        &self,
        tenant_id: i64,
        code: &str,
        locale: &str,
        default_locale: &str,
        channel: Channel,
    ) -> ServiceResult<MessageTemplate> {
        for candidate in fallback_chain(locale, default_locale) {
            if let Some(template) = repo::find_template(&self.db, tenant_id, code, &candidate, channel).await? {
                return Ok(template);
            }
        }
        Err(ServiceError::not_found(format!(
            "No {} template '{}' for locale '{}'",
            channel, code, locale
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::fixture;
    use lms_common::api::ErrorKind;
    use lms_common::db::init::set_setting;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_render_placeholders() {
        let out = render_template("Hi {{ name }}, {{missing}}welcome to {{course}}", &vars(&[
            ("name", "Ada"),
            ("course", "Rust"),
        ]));
        assert_eq!(out, "Hi Ada, welcome to Rust");
        assert_eq!(render_template("open {{ end", &vars(&[])), "open {{ end");
    }

    #[test]
    fn test_recipient_rules() {
        assert!(validate_recipient(Channel::Email, "a@b.io").is_ok());
        assert!(validate_recipient(Channel::Email, "nobody").is_err());
        assert!(validate_recipient(Channel::Sms, "+15551234567").is_ok());
        assert!(validate_recipient(Channel::Sms, "5551234567").is_err());
        assert!(validate_recipient(Channel::Sms, "+12").is_err());
    }

    /// Fails every second message
    struct FlakyTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageTransport for FlakyTransport {
        async fn send(&self, _message: &OutboundMessage) -> Result<(), TransportError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
                Err(TransportError("gateway down".into()))
            } else {
                Ok(())
            }
        }
    }

    async fn seed_template(fx: &crate::services::test_support::Fixture) {
        fx.messaging
            .save_template(
                &fx.admin,
                TemplateInput {
                    code: "welcome".into(),
                    locale: "en".into(),
                    channel: Channel::Email,
                    subject: "Welcome {{name}}".into(),
                    body: "Hello {{name}}".into(),
                },
            )
            .await
            .unwrap();
    }

    fn queue(recipient: &str, locale: Option<&str>) -> QueueRequest {
        QueueRequest {
            code: "welcome".into(),
            channel: Channel::Email,
            locale: locale.map(String::from),
            recipient: recipient.into(),
            vars: vars(&[("name", "Ada")]),
        }
    }

    #[tokio::test]
    async fn test_queue_uses_locale_fallback() {
        let fx = fixture().await;
        seed_template(&fx).await;

        let message = fx
            .messaging
            .queue_templated(fx.tenant_id, queue("ada@example.com", Some("en-GB")))
            .await
            .unwrap();
        assert_eq!(message.subject, "Welcome Ada");
        assert_eq!(message.status, MessageStatus::Queued);

        let mut missing = queue("ada@example.com", None);
        missing.code = "nope".into();
        let err = fx.messaging.queue_templated(fx.tenant_id, missing).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_dispatch_records_failures_and_returns_first() {
        let fx = fixture().await;
        seed_template(&fx).await;
        for n in 0..3 {
            fx.messaging
                .queue_templated(fx.tenant_id, queue(&format!("u{}@example.com", n), None))
                .await
                .unwrap();
        }

        let transport = FlakyTransport {
            calls: AtomicUsize::new(0),
        };
        let err = fx
            .messaging
            .dispatch_pending(fx.tenant_id, &transport, 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);

        let failed = fx
            .messaging
            .list_messages(&fx.admin, Some(MessageStatus::Failed), 10, 0)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("gateway down"));

        let sent = fx
            .messaging
            .list_messages(&fx.admin, Some(MessageStatus::Sent), 10, 0)
            .await
            .unwrap();
        assert_eq!(sent.len(), 2);
    }

    #[tokio::test]
    async fn test_log_transport_sends_everything() {
        let fx = fixture().await;
        seed_template(&fx).await;
        fx.messaging
            .queue_templated(fx.tenant_id, queue("ada@example.com", None))
            .await
            .unwrap();

        let report = fx
            .messaging
            .dispatch_pending(fx.tenant_id, &LogTransport::new("noreply@acme.test"), 10)
            .await
            .unwrap();
        assert_eq!(report.sent, 1);
    }

    #[tokio::test]
    async fn test_dispatch_waits_for_running_dispatch() {
        let fx = fixture().await;
        seed_template(&fx).await;
        set_setting(&fx.db, "database_max_lock_wait_ms", "0").await.unwrap();
        fx.messaging
            .queue_templated(fx.tenant_id, queue("ada@example.com", None))
            .await
            .unwrap();

        let lock_name = format!("dispatch:{}", fx.tenant_id);
        assert!(fx
            .locks
            .try_acquire(&lock_name, "other-worker", Duration::from_secs(30))
            .await
            .unwrap());

        let transport = FlakyTransport {
            calls: AtomicUsize::new(0),
        };
        let err = fx
            .messaging
            .dispatch_pending(fx.tenant_id, &transport, 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

        let queued = fx
            .messaging
            .list_messages(&fx.admin, Some(MessageStatus::Queued), 10, 0)
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);

        fx.locks.release(&lock_name, "other-worker").await.unwrap();
        let report = fx.messaging.dispatch_pending(fx.tenant_id, &transport, 10).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
