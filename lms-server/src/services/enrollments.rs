//! Program enrollments

use super::{CurrentUser, ServiceError, ServiceResult};
use crate::db::{catalog, enrollments as repo, identity, payments};
use lms_common::db::{Enrollment, EnrollmentStatus};
use lms_common::events::{EventBus, LmsEvent};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct EnrollRequest {
    pub program_id: i64,
    /// Admins may enroll someone else
    #[serde(default)]
    pub user_id: Option<i64>,
}

#[derive(Clone)]
pub struct EnrollmentService {
    db: SqlitePool,
    events: EventBus,
}

impl EnrollmentService {
    pub fn new(db: SqlitePool, events: EventBus) -> Self {
        Self { db, events }
    }

    /// Enroll in a published program
    ///
    /// Free programs start `active`, priced ones `pending_payment`. A
    /// second open enrollment for the same user and program is a Conflict.
    pub async fn enroll(&self, user: &CurrentUser, request: EnrollRequest) -> ServiceResult<Enrollment> {
        let student_id = match request.user_id {
            Some(id) if id != user.user_id => {
                user.require_admin()?;
                identity::find_user(&self.db, user.tenant_id, id)
                    .await?
                    .ok_or_else(|| ServiceError::not_found(format!("User {} not found", id)))?
                    .id
            }
            _ => user.user_id,
        };

        let program = catalog::find_program(&self.db, user.tenant_id, request.program_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Program {} not found", request.program_id)))?;
        if !program.is_published {
            return Err(ServiceError::bad_request(format!(
                "Program '{}' is not open for enrollment",
                program.code
            )));
        }

        if repo::find_open_enrollment(&self.db, user.tenant_id, student_id, program.id)
            .await?
            .is_some()
        {
            return Err(already_enrolled(&program.code));
        }

        let status = if program.price_cents > 0 {
            EnrollmentStatus::PendingPayment
        } else {
            EnrollmentStatus::Active
        };

        // The partial unique index catches a concurrent duplicate
        let enrollment = repo::insert_enrollment(&self.db, user.tenant_id, student_id, program.id, status)
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    already_enrolled(&program.code)
                } else {
                    e.into()
                }
            })?;

        info!(
            tenant_id = user.tenant_id,
            enrollment_id = enrollment.id,
            user_id = student_id,
            program_id = program.id,
            status = %status,
            "Enrollment created"
        );

        self.events.emit_lossy(LmsEvent::EnrollmentCreated {
            tenant_id: user.tenant_id,
            enrollment_id: enrollment.id,
            user_id: student_id,
            program_id: program.id,
            timestamp: enrollment.enrolled_at,
        });

        Ok(enrollment)
    }

    /// Cancel an enrollment (owner or admin); completed ones stay
    ///
    /// Pending payments of the enrollment fail with it.
    pub async fn cancel(&self, user: &CurrentUser, id: i64) -> ServiceResult<Enrollment> {
        let enrollment = self.get(user, id).await?;

        match enrollment.status {
            EnrollmentStatus::Completed => {
                return Err(ServiceError::bad_request("Completed enrollments cannot be cancelled"))
            }
            EnrollmentStatus::Cancelled => return Ok(enrollment),
            _ => {}
        }

        let mut tx = self.db.begin().await?;
        repo::set_status(&mut *tx, id, EnrollmentStatus::Cancelled).await?;
        let failed_payments = payments::fail_pending_for_enrollment(&mut *tx, id).await?;
        tx.commit().await?;

        info!(
            tenant_id = user.tenant_id,
            enrollment_id = id,
            failed_payments,
            "Enrollment cancelled"
        );
        self.get(user, id).await
    }

    /// One enrollment, visible to its owner and admins
    pub async fn get(&self, user: &CurrentUser, id: i64) -> ServiceResult<Enrollment> {
        let enrollment = repo::find_enrollment(&self.db, user.tenant_id, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Enrollment {} not found", id)))?;

        if enrollment.user_id != user.user_id && !user.is_admin() {
            return Err(ServiceError::forbidden("Not your enrollment"));
        }
        Ok(enrollment)
    }

    pub async fn list_for_user(&self, user: &CurrentUser, user_id: Option<i64>) -> ServiceResult<Vec<Enrollment>> {
        let target = user_id.unwrap_or(user.user_id);
        if target != user.user_id {
            user.require_admin()?;
        }
        Ok(repo::list_for_user(&self.db, user.tenant_id, target).await?)
    }
}

fn already_enrolled(code: &str) -> ServiceError {
    ServiceError::conflict(format!("Already enrolled in program '{}'", code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{fixture, program_input};
    use lms_common::api::ErrorKind;

    #[tokio::test]
    async fn test_enrolling_twice_is_conflict() {
        let fx = fixture().await;
        let program = fx.catalog.create_program(&fx.admin, program_input("P1", 0)).await.unwrap();
        let request = EnrollRequest {
            program_id: program.id,
            user_id: None,
        };

        let first = fx.enrollments.enroll(&fx.student, request.clone()).await.unwrap();
        assert_eq!(first.status, EnrollmentStatus::Active);

        let err = fx.enrollments.enroll(&fx.student, request).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_priced_program_waits_for_payment() {
        let fx = fixture().await;
        let program = fx.catalog.create_program(&fx.admin, program_input("PAID", 4900)).await.unwrap();

        let enrollment = fx
            .enrollments
            .enroll(
                &fx.student,
                EnrollRequest {
                    program_id: program.id,
                    user_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(enrollment.status, EnrollmentStatus::PendingPayment);
    }

    #[tokio::test]
    async fn test_reenroll_after_cancel() {
        let fx = fixture().await;
        let program = fx.catalog.create_program(&fx.admin, program_input("P1", 0)).await.unwrap();
        let request = EnrollRequest {
            program_id: program.id,
            user_id: None,
        };

        let first = fx.enrollments.enroll(&fx.student, request.clone()).await.unwrap();
        let cancelled = fx.enrollments.cancel(&fx.student, first.id).await.unwrap();
        assert_eq!(cancelled.status, EnrollmentStatus::Cancelled);

        fx.enrollments.enroll(&fx.student, request).await.unwrap();
        assert_eq!(fx.enrollments.list_for_user(&fx.student, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unpublished_program_rejected() {
        let fx = fixture().await;
        let mut input = program_input("DRAFT", 0);
        input.is_published = false;
        let program = fx.catalog.create_program(&fx.admin, input).await.unwrap();

        let err = fx
            .enrollments
            .enroll(
                &fx.student,
                EnrollRequest {
                    program_id: program.id,
                    user_id: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_students_cannot_see_other_enrollments() {
        let fx = fixture().await;
        let program = fx.catalog.create_program(&fx.admin, program_input("P1", 0)).await.unwrap();
        let enrollment = fx
            .enrollments
            .enroll(
                &fx.admin,
                EnrollRequest {
                    program_id: program.id,
                    user_id: None,
                },
            )
            .await
            .unwrap();

        let err = fx.enrollments.get(&fx.student, enrollment.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }
}
