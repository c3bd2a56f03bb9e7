//! Message templates and the outbound message queue

use chrono::Utc;
use lms_common::db::{Channel, MessageStatus, MessageTemplate, OutboundMessage};
use lms_common::Result;
use sqlx::SqlitePool;

const OUTBOUND_COLUMNS: &str = "id, tenant_id, channel, recipient, subject, body, status, attempts, \
     last_error, sent_at, created_at";

/// Insert or replace the template for (code, locale, channel)
pub async fn upsert_template(
    pool: &SqlitePool,
    tenant_id: i64,
    code: &str,
    locale: &str,
    channel: Channel,
    subject: &str,
    body: &str,
) -> Result<MessageTemplate> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO message_templates (
            tenant_id, code, locale, channel, subject, body, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (tenant_id, code, locale, channel) DO UPDATE SET
            subject = excluded.subject,
            body = excluded.body,
            updated_at = excluded.updated_at,
            is_deleted = 0,
            deleted_at = NULL
        "#,
    )
    .bind(tenant_id)
    .bind(code)
    .bind(locale)
    .bind(channel)
    .bind(subject)
    .bind(body)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let template = sqlx::query_as::<_, MessageTemplate>(
        "SELECT id, tenant_id, code, locale, channel, subject, body FROM message_templates \
         WHERE tenant_id = ? AND code = ? AND locale = ? AND channel = ?",
    )
    .bind(tenant_id)
    .bind(code)
    .bind(locale)
    .bind(channel)
    .fetch_one(pool)
    .await?;
    Ok(template)
}

pub async fn find_template(
    pool: &SqlitePool,
    tenant_id: i64,
    code: &str,
    locale: &str,
    channel: Channel,
) -> Result<Option<MessageTemplate>> {
    let template = sqlx::query_as::<_, MessageTemplate>(
        "SELECT id, tenant_id, code, locale, channel, subject, body FROM message_templates \
         WHERE tenant_id = ? AND code = ? AND locale = ? AND channel = ? AND is_deleted = 0",
    )
    .bind(tenant_id)
    .bind(code)
    .bind(locale)
    .bind(channel)
    .fetch_optional(pool)
    .await?;
    Ok(template)
}

pub async fn list_templates(pool: &SqlitePool, tenant_id: i64) -> Result<Vec<MessageTemplate>> {
    let templates = sqlx::query_as::<_, MessageTemplate>(
        "SELECT id, tenant_id, code, locale, channel, subject, body FROM message_templates \
         WHERE tenant_id = ? AND is_deleted = 0 ORDER BY code, locale, channel",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;
    Ok(templates)
}

pub async fn enqueue(
    pool: &SqlitePool,
    tenant_id: i64,
    channel: Channel,
    recipient: &str,
    subject: &str,
    body: &str,
) -> Result<OutboundMessage> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO outbound_messages (
            tenant_id, channel, recipient, subject, body, status, attempts,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(tenant_id)
    .bind(channel)
    .bind(recipient)
    .bind(subject)
    .bind(body)
    .bind(MessageStatus::Queued)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(OutboundMessage {
        id,
        tenant_id,
        channel,
        recipient: recipient.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        status: MessageStatus::Queued,
        attempts: 0,
        last_error: None,
        sent_at: None,
        created_at: now,
    })
}

pub async fn list_queued(pool: &SqlitePool, tenant_id: i64, limit: i64) -> Result<Vec<OutboundMessage>> {
    let messages = sqlx::query_as::<_, OutboundMessage>(&format!(
        "SELECT {} FROM outbound_messages \
         WHERE tenant_id = ? AND status = 'queued' AND is_deleted = 0 \
         ORDER BY created_at, id LIMIT ?",
        OUTBOUND_COLUMNS
    ))
    .bind(tenant_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(messages)
}

pub async fn list_messages(
    pool: &SqlitePool,
    tenant_id: i64,
    status: Option<MessageStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<OutboundMessage>> {
    let messages = sqlx::query_as::<_, OutboundMessage>(&format!(
        "SELECT {} FROM outbound_messages \
         WHERE tenant_id = ? AND is_deleted = 0 AND (? IS NULL OR status = ?) \
         ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        OUTBOUND_COLUMNS
    ))
    .bind(tenant_id)
    .bind(status)
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(messages)
}

pub async fn mark_sent(pool: &SqlitePool, id: i64) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        UPDATE outbound_messages
        SET status = 'sent', attempts = attempts + 1, last_error = NULL, sent_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(pool: &SqlitePool, id: i64, error: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE outbound_messages
        SET status = 'failed', attempts = attempts + 1, last_error = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(error)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}
