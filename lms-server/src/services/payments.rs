//! Payments for priced programs
//!
//! ```text
//! pending --mark_paid--> paid --refund--> refunded
//!    \
//!     --mark_failed--> failed
//! ```
//!
//! A paid payment activates its enrollment; a refund cancels it. Any other
//! transition is a Conflict.

use super::{CurrentUser, ServiceError, ServiceResult};
use crate::db::{catalog, enrollments, payments as repo};
use chrono::Utc;
use lms_common::db::{EnrollmentStatus, Payment, PaymentStatus};
use lms_common::events::{EventBus, LmsEvent};
use sqlx::SqlitePool;
use tracing::info;

#[derive(Clone)]
pub struct PaymentService {
    db: SqlitePool,
    events: EventBus,
}

impl PaymentService {
    pub fn new(db: SqlitePool, events: EventBus) -> Self {
        Self { db, events }
    }

    /// Open a payment for an enrollment awaiting payment
    ///
    /// Amount and currency come from the program. An existing pending
    /// payment is returned instead of opening a second one.
    pub async fn create_payment(&self, user: &CurrentUser, enrollment_id: i64) -> ServiceResult<Payment> {
        let enrollment = enrollments::find_enrollment(&self.db, user.tenant_id, enrollment_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Enrollment {} not found", enrollment_id)))?;
        if enrollment.user_id != user.user_id && !user.is_admin() {
            return Err(ServiceError::forbidden("Not your enrollment"));
        }
        if enrollment.status != EnrollmentStatus::PendingPayment {
            return Err(ServiceError::bad_request(format!(
                "Enrollment is {}, not awaiting payment",
                enrollment.status
            )));
        }

        if let Some(pending) = repo::find_pending_for_enrollment(&self.db, enrollment_id).await? {
            return Ok(pending);
        }

        let program = catalog::find_program(&self.db, user.tenant_id, enrollment.program_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Program no longer exists"))?;

        let payment = repo::insert_payment(
            &self.db,
            user.tenant_id,
            enrollment_id,
            program.price_cents,
            &program.currency,
        )
        .await?;

        info!(
            tenant_id = user.tenant_id,
            payment_id = payment.id,
            enrollment_id,
            amount_cents = payment.amount_cents,
            "Payment created"
        );
        Ok(payment)
    }

    pub async fn mark_paid(&self, user: &CurrentUser, id: i64, reference: &str) -> ServiceResult<Payment> {
        user.require_admin()?;
        let reference = reference.trim();
        let reference = (!reference.is_empty()).then_some(reference);
        self.transition(
            user,
            id,
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            reference,
            Some(EnrollmentStatus::Active),
        )
        .await
    }

    pub async fn mark_failed(&self, user: &CurrentUser, id: i64) -> ServiceResult<Payment> {
        user.require_admin()?;
        self.transition(user, id, PaymentStatus::Pending, PaymentStatus::Failed, None, None)
            .await
    }

    pub async fn refund(&self, user: &CurrentUser, id: i64) -> ServiceResult<Payment> {
        user.require_admin()?;
        self.transition(
            user,
            id,
            PaymentStatus::Paid,
            PaymentStatus::Refunded,
            None,
            Some(EnrollmentStatus::Cancelled),
        )
        .await
    }

    pub async fn get(&self, user: &CurrentUser, id: i64) -> ServiceResult<Payment> {
        let payment = self.payment(user.tenant_id, id).await?;
        if !user.is_admin() {
            let enrollment = enrollments::find_enrollment(&self.db, user.tenant_id, payment.enrollment_id).await?;
            if enrollment.map(|e| e.user_id) != Some(user.user_id) {
                return Err(ServiceError::forbidden("Not your payment"));
            }
        }
        Ok(payment)
    }

    pub async fn list_for_enrollment(&self, user: &CurrentUser, enrollment_id: i64) -> ServiceResult<Vec<Payment>> {
        let enrollment = enrollments::find_enrollment(&self.db, user.tenant_id, enrollment_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Enrollment {} not found", enrollment_id)))?;
        if enrollment.user_id != user.user_id && !user.is_admin() {
            return Err(ServiceError::forbidden("Not your enrollment"));
        }
        Ok(repo::list_for_enrollment(&self.db, user.tenant_id, enrollment_id).await?)
    }

    async fn payment(&self, tenant_id: i64, id: i64) -> ServiceResult<Payment> {
        repo::find_payment(&self.db, tenant_id, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Payment {} not found", id)))
    }

    async fn transition(
        &self,
        user: &CurrentUser,
        id: i64,
        from: PaymentStatus,
        to: PaymentStatus,
        reference: Option<&str>,
        enrollment_status: Option<EnrollmentStatus>,
    ) -> ServiceResult<Payment> {
        let mut tx = self.db.begin().await?;

        let payment = repo::find_payment(&mut *tx, user.tenant_id, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Payment {} not found", id)))?;
        if payment.status != from {
            return Err(ServiceError::conflict(format!(
                "Payment is {}, cannot become {}",
                payment.status, to
            )));
        }

        let enrollment = enrollments::find_enrollment(&mut *tx, user.tenant_id, payment.enrollment_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Enrollment {} not found", payment.enrollment_id)))?;
        let enrollment_change = match enrollment_status {
            Some(target) => enrollment_target(enrollment.status, target)?,
            None => None,
        };

        let paid_at = (to == PaymentStatus::Paid).then(Utc::now);
        if !repo::transition(&mut *tx, id, from, to, reference, paid_at).await? {
            return Err(ServiceError::conflict("Payment changed concurrently"));
        }
        if let Some(status) = enrollment_change {
            enrollments::set_status(&mut *tx, enrollment.id, status).await?;
        }
        tx.commit().await?;

        info!(
            tenant_id = user.tenant_id,
            payment_id = id,
            from = %from,
            to = %to,
            "Payment status changed"
        );

        self.events.emit_lossy(LmsEvent::PaymentStatusChanged {
            tenant_id: user.tenant_id,
            payment_id: id,
            status: to.to_string(),
            timestamp: Utc::now(),
        });

        self.payment(user.tenant_id, id).await
    }
}

/// Enrollment status a payment transition leads to
///
/// Payment activates only an enrollment still awaiting it. A refund
/// cancels an open enrollment, leaves a cancelled one alone and never
/// touches a completed one.
fn enrollment_target(
    current: EnrollmentStatus,
    target: EnrollmentStatus,
) -> ServiceResult<Option<EnrollmentStatus>> {
    match (target, current) {
        (EnrollmentStatus::Active, EnrollmentStatus::PendingPayment) => Ok(Some(target)),
        (EnrollmentStatus::Active, other) => Err(ServiceError::conflict(format!(
            "Enrollment is {}, payment cannot activate it",
            other
        ))),
        (EnrollmentStatus::Cancelled, EnrollmentStatus::Active | EnrollmentStatus::PendingPayment) => {
            Ok(Some(target))
        }
        (EnrollmentStatus::Cancelled, EnrollmentStatus::Cancelled) => Ok(None),
        (EnrollmentStatus::Cancelled, EnrollmentStatus::Completed) => Err(ServiceError::bad_request(
            "Completed enrollments cannot be refunded",
        )),
        (target, current) => Err(ServiceError::conflict(format!(
            "Enrollment is {}, cannot become {}",
            current, target
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::enrollments::EnrollRequest;
    use crate::services::test_support::{fixture, program_input, Fixture};
    use lms_common::api::ErrorKind;
    use lms_common::db::Enrollment;

    async fn paid_enrollment(fx: &Fixture) -> Enrollment {
        let program = fx.catalog.create_program(&fx.admin, program_input("PAID", 2500)).await.unwrap();
        fx.enrollments
            .enroll(&fx.student, EnrollRequest { program_id: program.id, user_id: None })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pay_then_refund() {
        let fx = fixture().await;
        let enrollment = paid_enrollment(&fx).await;

        let payment = fx.payments.create_payment(&fx.student, enrollment.id).await.unwrap();
        assert_eq!(payment.amount_cents, 2500);
        let same = fx.payments.create_payment(&fx.student, enrollment.id).await.unwrap();
        assert_eq!(same.id, payment.id);

        let paid = fx.payments.mark_paid(&fx.admin, payment.id, "txn-1").await.unwrap();
        assert_eq!(paid.status, PaymentStatus::Paid);
        assert_eq!(paid.provider_reference.as_deref(), Some("txn-1"));
        assert!(paid.paid_at.is_some());
        let active = fx.enrollments.get(&fx.student, enrollment.id).await.unwrap();
        assert_eq!(active.status, EnrollmentStatus::Active);

        let refunded = fx.payments.refund(&fx.admin, payment.id).await.unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        let cancelled = fx.enrollments.get(&fx.student, enrollment.id).await.unwrap();
        assert_eq!(cancelled.status, EnrollmentStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_invalid_transition_is_conflict() {
        let fx = fixture().await;
        let enrollment = paid_enrollment(&fx).await;
        let payment = fx.payments.create_payment(&fx.student, enrollment.id).await.unwrap();

        let err = fx.payments.refund(&fx.admin, payment.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);

        fx.payments.mark_failed(&fx.admin, payment.id).await.unwrap();
        let err = fx.payments.mark_paid(&fx.admin, payment.id, "late").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_cancelled_enrollment_is_not_revived_by_payment() {
        let fx = fixture().await;
        let enrollment = paid_enrollment(&fx).await;
        let payment = fx.payments.create_payment(&fx.student, enrollment.id).await.unwrap();

        fx.enrollments.cancel(&fx.student, enrollment.id).await.unwrap();
        let failed = fx.payments.get(&fx.admin, payment.id).await.unwrap();
        assert_eq!(failed.status, PaymentStatus::Failed);

        let err = fx.payments.mark_paid(&fx.admin, payment.id, "late").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        let still = fx.enrollments.get(&fx.student, enrollment.id).await.unwrap();
        assert_eq!(still.status, EnrollmentStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_late_payment_leaves_new_enrollment_alone() {
        let fx = fixture().await;
        let enrollment = paid_enrollment(&fx).await;
        let payment = fx.payments.create_payment(&fx.student, enrollment.id).await.unwrap();

        fx.enrollments.cancel(&fx.student, enrollment.id).await.unwrap();
        let again = fx
            .enrollments
            .enroll(&fx.student, EnrollRequest { program_id: enrollment.program_id, user_id: None })
            .await
            .unwrap();

        let err = fx.payments.mark_paid(&fx.admin, payment.id, "late").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(fx.payments.get(&fx.admin, payment.id).await.unwrap().status, PaymentStatus::Failed);

        let again = fx.enrollments.get(&fx.student, again.id).await.unwrap();
        assert_eq!(again.status, EnrollmentStatus::PendingPayment);
        let fresh = fx.payments.create_payment(&fx.student, again.id).await.unwrap();
        fx.payments.mark_paid(&fx.admin, fresh.id, "txn-2").await.unwrap();
        assert_eq!(
            fx.enrollments.get(&fx.student, again.id).await.unwrap().status,
            EnrollmentStatus::Active
        );
    }

    #[tokio::test]
    async fn test_completed_enrollment_cannot_be_refunded() {
        let fx = fixture().await;
        let enrollment = paid_enrollment(&fx).await;
        let payment = fx.payments.create_payment(&fx.student, enrollment.id).await.unwrap();
        fx.payments.mark_paid(&fx.admin, payment.id, "txn-1").await.unwrap();
        enrollments::mark_completed(&fx.db, enrollment.id, Utc::now()).await.unwrap();

        let err = fx.payments.refund(&fx.admin, payment.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(fx.payments.get(&fx.admin, payment.id).await.unwrap().status, PaymentStatus::Paid);
        assert_eq!(
            fx.enrollments.get(&fx.student, enrollment.id).await.unwrap().status,
            EnrollmentStatus::Completed
        );
    }

    #[test]
    fn test_refund_of_cancelled_enrollment_keeps_it_cancelled() {
        assert_eq!(
            enrollment_target(EnrollmentStatus::Cancelled, EnrollmentStatus::Cancelled).unwrap(),
            None
        );
        assert_eq!(
            enrollment_target(EnrollmentStatus::Active, EnrollmentStatus::Cancelled).unwrap(),
            Some(EnrollmentStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_students_cannot_mark_paid() {
        let fx = fixture().await;
        let enrollment = paid_enrollment(&fx).await;
        let payment = fx.payments.create_payment(&fx.student, enrollment.id).await.unwrap();

        let err = fx.payments.mark_paid(&fx.student, payment.id, "self").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }
}
