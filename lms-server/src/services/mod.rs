//! Business services
//!
//! Every service method follows the same shape: validate input, query,
//! check the business rule, mutate, save, log, return a typed result.
//! Failures come back as [`ServiceError`] (kind + message) and are never
//! panics; the HTTP layer renders them into the uniform envelope.

pub mod catalog;
pub mod certificates;
pub mod enrollments;
pub mod identity;
pub mod localization;
pub mod locks;
pub mod messaging;
pub mod payments;
pub mod progress;
pub mod quizzes;
pub mod test_attempts;

pub use catalog::CatalogService;
pub use certificates::{CertificateRenderer, CertificateService, HtmlCertificateRenderer};
pub use enrollments::EnrollmentService;
pub use identity::{CurrentUser, IdentityService};
pub use localization::LocalizationService;
pub use locks::LockService;
pub use messaging::{LogTransport, MessageTransport, MessagingService};
pub use payments::PaymentService;
pub use progress::ProgressService;
pub use quizzes::TestService;
pub use test_attempts::TestAttemptService;

use crate::import::ImportService;
use lms_common::api::ErrorKind;
use lms_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Every service, wired to one database pool and event bus
#[derive(Clone)]
pub struct Services {
    pub identity: IdentityService,
    pub catalog: CatalogService,
    pub enrollments: EnrollmentService,
    pub tests: TestService,
    pub attempts: TestAttemptService,
    pub progress: ProgressService,
    pub certificates: CertificateService,
    pub payments: PaymentService,
    pub messaging: MessagingService,
    pub localization: LocalizationService,
    pub locks: LockService,
    pub imports: ImportService,
}

impl Services {
    /// `max_import_batch` overrides the `import_max_batch_size` setting
    pub fn new(db: SqlitePool, events: EventBus, max_import_batch: Option<usize>) -> Self {
        let locks = LockService::new(db.clone());
        let certificates = CertificateService::new(
            db.clone(),
            events.clone(),
            locks.clone(),
            Arc::new(HtmlCertificateRenderer),
        );
        let progress = ProgressService::new(db.clone(), events.clone(), certificates.clone());

        Self {
            identity: IdentityService::new(db.clone()),
            catalog: CatalogService::new(db.clone()),
            enrollments: EnrollmentService::new(db.clone(), events.clone()),
            tests: TestService::new(db.clone()),
            attempts: TestAttemptService::new(db.clone(), events.clone(), progress.clone()),
            progress,
            certificates,
            payments: PaymentService::new(db.clone(), events.clone()),
            messaging: MessagingService::new(db.clone(), locks.clone()),
            localization: LocalizationService::new(db.clone()),
            imports: ImportService::new(db, events, locks.clone(), max_import_batch),
            locks,
        }
    }
}

/// Result type returned by every service method
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Tagged service failure
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<lms_common::Error> for ServiceError {
    fn from(err: lms_common::Error) -> Self {
        use lms_common::Error;

        if err.is_unique_violation() {
            return ServiceError::conflict("Record already exists");
        }

        match err {
            Error::NotFound(msg) => ServiceError::not_found(msg),
            Error::InvalidInput(msg) => ServiceError::bad_request(msg),
            Error::Conflict(msg) => ServiceError::conflict(msg),
            other => {
                error!(error = %other, "Unhandled service failure");
                ServiceError::internal(other.to_string())
            }
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        lms_common::Error::Database(err).into()
    }
}

/// Require a non-blank string field
pub(crate) fn require_text(value: &str, field: &str) -> ServiceResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::bad_request(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_errors_map_to_kinds() {
        let err: ServiceError = lms_common::Error::NotFound("program 4".into()).into();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err: ServiceError = lms_common::Error::InvalidInput("bad".into()).into();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let err: ServiceError = lms_common::Error::Internal("boom".into()).into();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[test]
    fn test_require_text_trims() {
        assert_eq!(require_text("  Intro ", "title").unwrap(), "Intro");
        assert_eq!(
            require_text("   ", "title").unwrap_err().kind,
            ErrorKind::BadRequest
        );
    }
}
