//! Certificates: issue, verify, render
//!
//! Numbers look like `CERT-ACME-2026-000042`: the configured prefix, the
//! tenant slug, the year of issue and a per-tenant sequence. Sequence
//! allocation runs under the `certificate-seq:<tenant>` lock.

use super::{CurrentUser, LockService, ServiceError, ServiceResult};
use crate::db::certificates::{self as repo, CertificateDetails, NewCertificate};
use crate::db::{enrollments, identity};
use chrono::{Datelike, Utc};
use lms_common::db::init::get_setting;
use lms_common::db::{Certificate, EnrollmentStatus};
use lms_common::events::{EventBus, LmsEvent};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

/// Turns certificate details into a document
pub trait CertificateRenderer: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn render(&self, details: &CertificateDetails) -> String;
}

/// Standalone HTML page
#[derive(Debug, Default, Clone)]
pub struct HtmlCertificateRenderer;

impl CertificateRenderer for HtmlCertificateRenderer {
    fn content_type(&self) -> &'static str {
        "text/html; charset=utf-8"
    }

    fn render(&self, details: &CertificateDetails) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Certificate {number}</title>
<style>
body {{ font-family: Georgia, serif; text-align: center; padding: 4em; }}
.holder {{ font-size: 2em; margin: 1em 0; }}
.number {{ color: #666; font-size: 0.9em; }}
</style>
</head>
<body>
<h1>Certificate of Completion</h1>
<p>{issuer} certifies that</p>
<p class="holder">{holder}</p>
<p>has completed the program</p>
<h2>{program}</h2>
<p>Issued {date}</p>
<p class="number">{number}</p>
</body>
</html>
"#,
            number = escape_html(&details.number),
            issuer = escape_html(&details.tenant_name),
            holder = escape_html(&details.holder_name),
            program = escape_html(&details.program_title),
            date = details.issued_at.format("%Y-%m-%d"),
        )
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Format a certificate number
pub fn format_number(prefix: &str, tenant_slug: &str, year: i32, sequence: i64) -> String {
    format!("{}-{}-{}-{:06}", prefix, tenant_slug.to_uppercase(), year, sequence)
}

#[derive(Clone)]
pub struct CertificateService {
    db: SqlitePool,
    events: EventBus,
    locks: LockService,
    renderer: Arc<dyn CertificateRenderer>,
}

impl CertificateService {
    pub fn new(
        db: SqlitePool,
        events: EventBus,
        locks: LockService,
        renderer: Arc<dyn CertificateRenderer>,
    ) -> Self {
        Self {
            db,
            events,
            locks,
            renderer,
        }
    }

    /// Issue the certificate of a completed enrollment; idempotent
    pub async fn issue(&self, tenant_id: i64, enrollment_id: i64) -> ServiceResult<Certificate> {
        let enrollment = enrollments::find_enrollment(&self.db, tenant_id, enrollment_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Enrollment {} not found", enrollment_id)))?;
        if enrollment.status != EnrollmentStatus::Completed {
            return Err(ServiceError::bad_request("Enrollment is not completed"));
        }

        if let Some(existing) = repo::find_by_enrollment(&self.db, enrollment_id).await? {
            return Ok(existing);
        }

        let tenant = identity::find_tenant(&self.db, tenant_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Tenant {} not found", tenant_id)))?;
        let prefix = get_setting(&self.db, "certificate_number_prefix")
            .await?
            .unwrap_or_else(|| "CERT".to_string());

        let lock_name = format!("certificate-seq:{}", tenant_id);
        let ttl = self.locks.default_ttl().await?;

        let certificate = self
            .locks
            .with_lock(&lock_name, ttl, || async {
                // Re-check under the lock; a concurrent caller may have won
                if let Some(existing) = repo::find_by_enrollment(&self.db, enrollment_id).await? {
                    return Ok(existing);
                }

                let issued_at = Utc::now();
                let sequence = repo::max_sequence(&self.db, tenant_id).await? + 1;
                let number = format_number(&prefix, &tenant.slug, issued_at.year(), sequence);

                let certificate = repo::insert_certificate(
                    &self.db,
                    &NewCertificate {
                        tenant_id,
                        enrollment_id,
                        user_id: enrollment.user_id,
                        program_id: enrollment.program_id,
                        number: &number,
                        sequence,
                        issued_at,
                    },
                )
                .await?;
                Ok::<_, ServiceError>(certificate)
            })
            .await?;

        info!(
            tenant_id,
            enrollment_id,
            certificate_id = certificate.id,
            number = %certificate.number,
            "Certificate issued"
        );

        self.events.emit_lossy(LmsEvent::CertificateIssued {
            tenant_id,
            certificate_id: certificate.id,
            number: certificate.number.clone(),
            timestamp: certificate.issued_at,
        });

        Ok(certificate)
    }

    /// Public lookup by number
    pub async fn verify(&self, number: &str) -> ServiceResult<CertificateDetails> {
        repo::find_details_by_number(&self.db, number.trim())
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Certificate '{}' not found", number)))
    }

    pub async fn list_for_user(&self, user: &CurrentUser) -> ServiceResult<Vec<Certificate>> {
        Ok(repo::list_for_user(&self.db, user.tenant_id, user.user_id).await?)
    }

    /// Render a certificate; owner or admin only
    ///
    /// Returns the content type and the document.
    pub async fn render(&self, user: &CurrentUser, id: i64) -> ServiceResult<(&'static str, String)> {
        let certificate = repo::find_certificate(&self.db, user.tenant_id, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Certificate {} not found", id)))?;
        if certificate.user_id != user.user_id && !user.is_admin() {
            return Err(ServiceError::forbidden("Not your certificate"));
        }

        let details = self.verify(&certificate.number).await?;
        Ok((self.renderer.content_type(), self.renderer.render(&details)))
    }
}
