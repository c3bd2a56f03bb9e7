//! Certificate persistence

use chrono::{DateTime, Utc};
use lms_common::db::Certificate;
use lms_common::Result;
use serde::Serialize;
use sqlx::{FromRow, SqliteExecutor, SqlitePool};

const CERTIFICATE_COLUMNS: &str =
    "id, tenant_id, enrollment_id, user_id, program_id, number, sequence, issued_at";

pub async fn find_by_enrollment<'e, E: SqliteExecutor<'e>>(
    executor: E,
    enrollment_id: i64,
) -> Result<Option<Certificate>> {
    let certificate = sqlx::query_as::<_, Certificate>(&format!(
        "SELECT {} FROM certificates WHERE enrollment_id = ? AND is_deleted = 0",
        CERTIFICATE_COLUMNS
    ))
    .bind(enrollment_id)
    .fetch_optional(executor)
    .await?;
    Ok(certificate)
}

pub async fn find_certificate(pool: &SqlitePool, tenant_id: i64, id: i64) -> Result<Option<Certificate>> {
    let certificate = sqlx::query_as::<_, Certificate>(&format!(
        "SELECT {} FROM certificates WHERE tenant_id = ? AND id = ? AND is_deleted = 0",
        CERTIFICATE_COLUMNS
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(certificate)
}

pub async fn list_for_user(pool: &SqlitePool, tenant_id: i64, user_id: i64) -> Result<Vec<Certificate>> {
    let certificates = sqlx::query_as::<_, Certificate>(&format!(
        "SELECT {} FROM certificates WHERE tenant_id = ? AND user_id = ? AND is_deleted = 0 \
         ORDER BY issued_at DESC",
        CERTIFICATE_COLUMNS
    ))
    .bind(tenant_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(certificates)
}

/// Highest sequence allocated so far in a tenant (0 when none)
pub async fn max_sequence<'e, E: SqliteExecutor<'e>>(executor: E, tenant_id: i64) -> Result<i64> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(sequence) FROM certificates WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_one(executor)
            .await?;
    Ok(max.unwrap_or(0))
}

#[derive(Debug, Clone)]
pub struct NewCertificate<'a> {
    pub tenant_id: i64,
    pub enrollment_id: i64,
    pub user_id: i64,
    pub program_id: i64,
    pub number: &'a str,
    pub sequence: i64,
    pub issued_at: DateTime<Utc>,
}

pub async fn insert_certificate<'e, E: SqliteExecutor<'e>>(
    executor: E,
    cert: &NewCertificate<'_>,
) -> Result<Certificate> {
    let id = sqlx::query(
        r#"
        INSERT INTO certificates (
            tenant_id, enrollment_id, user_id, program_id, number, sequence,
            issued_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(cert.tenant_id)
    .bind(cert.enrollment_id)
    .bind(cert.user_id)
    .bind(cert.program_id)
    .bind(cert.number)
    .bind(cert.sequence)
    .bind(cert.issued_at)
    .bind(cert.issued_at)
    .bind(cert.issued_at)
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(Certificate {
        id,
        tenant_id: cert.tenant_id,
        enrollment_id: cert.enrollment_id,
        user_id: cert.user_id,
        program_id: cert.program_id,
        number: cert.number.to_string(),
        sequence: cert.sequence,
        issued_at: cert.issued_at,
    })
}

/// Public view of a certificate
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CertificateDetails {
    pub number: String,
    pub holder_name: String,
    pub program_title: String,
    pub tenant_name: String,
    pub issued_at: DateTime<Utc>,
}

pub async fn find_details_by_number(pool: &SqlitePool, number: &str) -> Result<Option<CertificateDetails>> {
    let details = sqlx::query_as::<_, CertificateDetails>(
        r#"
        SELECT c.number, u.display_name AS holder_name, p.title AS program_title,
               t.name AS tenant_name, c.issued_at
        FROM certificates c
        JOIN users u ON u.id = c.user_id
        JOIN programs p ON p.id = c.program_id
        JOIN tenants t ON t.id = c.tenant_id
        WHERE c.number = ? AND c.is_deleted = 0
        "#,
    )
    .bind(number)
    .fetch_optional(pool)
    .await?;
    Ok(details)
}
