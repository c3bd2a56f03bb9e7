//! Lesson completion and the lesson -> course -> program roll-up
//!
//! Percentages are integer and rounded down. When a program reaches 100%
//! the enrollment is completed and a certificate is issued.

use super::{CertificateService, CurrentUser, ServiceError, ServiceResult};
use crate::db::{catalog, enrollments, progress as repo};
use crate::utils::retry_on_lock;
use chrono::Utc;
use lms_common::db::init::get_setting_i64;
use lms_common::db::{Certificate, Enrollment, EnrollmentStatus};
use lms_common::events::{EventBus, LmsEvent};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct CourseProgress {
    pub course_id: i64,
    pub completed_lessons: i64,
    pub total_lessons: i64,
    pub percent: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgramProgress {
    pub program_id: i64,
    pub completed_lessons: i64,
    pub total_lessons: i64,
    pub percent: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub lesson_id: i64,
    /// False when the lesson had already been completed
    pub newly_completed: bool,
    pub course: CourseProgress,
    pub program: ProgramProgress,
    pub enrollment_status: EnrollmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
}

#[derive(Clone)]
pub struct ProgressService {
    db: SqlitePool,
    events: EventBus,
    certificates: CertificateService,
}

impl ProgressService {
    pub fn new(db: SqlitePool, events: EventBus, certificates: CertificateService) -> Self {
        Self {
            db,
            events,
            certificates,
        }
    }

    /// Mark a lesson complete and roll progress up; idempotent
    pub async fn complete_lesson(&self, user: &CurrentUser, lesson_id: i64) -> ServiceResult<CompletionOutcome> {
        let lesson = catalog::find_lesson(&self.db, user.tenant_id, lesson_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Lesson {} not found", lesson_id)))?;
        let program_id = catalog::program_id_for_lesson(&self.db, user.tenant_id, lesson_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Lesson is no longer part of a program"))?;

        let enrollment = enrollments::find_open_enrollment(&self.db, user.tenant_id, user.user_id, program_id)
            .await?
            .ok_or_else(|| ServiceError::forbidden("An active enrollment in the program is required"))?;

        let (newly_completed, enrollment) = match enrollment.status {
            EnrollmentStatus::Active => {
                let max_wait = get_setting_i64(&self.db, "database_max_lock_wait_ms", 5000).await?;
                let newly = retry_on_lock("lesson completion", max_wait.max(0) as u64, || {
                    record_completion(&self.db, user.tenant_id, user.user_id, lesson_id, &enrollment)
                })
                .await?;
                let refreshed = enrollments::find_enrollment(&self.db, user.tenant_id, enrollment.id)
                    .await?
                    .ok_or_else(|| ServiceError::internal("Enrollment vanished"))?;
                (newly, refreshed)
            }
            // Everything is already complete
            EnrollmentStatus::Completed => (false, enrollment),
            _ => {
                return Err(ServiceError::forbidden(
                    "An active enrollment in the program is required",
                ))
            }
        };

        let course = self.course_counts(user, lesson.course_id).await?;
        let program = self.program_counts(user, program_id).await?;

        if newly_completed {
            info!(
                tenant_id = user.tenant_id,
                user_id = user.user_id,
                lesson_id,
                course_percent = course.percent,
                program_percent = program.percent,
                "Lesson completed"
            );
            self.events.emit_lossy(LmsEvent::ProgressUpdated {
                tenant_id: user.tenant_id,
                enrollment_id: enrollment.id,
                progress_percent: enrollment.progress_percent,
                timestamp: Utc::now(),
            });
        }

        let certificate = if enrollment.status == EnrollmentStatus::Completed {
            Some(self.certificates.issue(user.tenant_id, enrollment.id).await?)
        } else {
            None
        };

        Ok(CompletionOutcome {
            lesson_id,
            newly_completed,
            course,
            program,
            enrollment_status: enrollment.status,
            certificate,
        })
    }

    pub async fn course_progress(&self, user: &CurrentUser, course_id: i64) -> ServiceResult<CourseProgress> {
        catalog::find_course(&self.db, user.tenant_id, course_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Course {} not found", course_id)))?;
        self.course_counts(user, course_id).await
    }

    pub async fn program_progress(&self, user: &CurrentUser, program_id: i64) -> ServiceResult<ProgramProgress> {
        catalog::find_program(&self.db, user.tenant_id, program_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Program {} not found", program_id)))?;
        self.program_counts(user, program_id).await
    }

    async fn course_counts(&self, user: &CurrentUser, course_id: i64) -> ServiceResult<CourseProgress> {
        let (completed, total) = repo::course_counts(&self.db, user.tenant_id, user.user_id, course_id).await?;
        Ok(CourseProgress {
            course_id,
            completed_lessons: completed,
            total_lessons: total,
            percent: repo::percent(completed, total),
        })
    }

    async fn program_counts(&self, user: &CurrentUser, program_id: i64) -> ServiceResult<ProgramProgress> {
        let (completed, total) = repo::program_counts(&self.db, user.tenant_id, user.user_id, program_id).await?;
        Ok(ProgramProgress {
            program_id,
            completed_lessons: completed,
            total_lessons: total,
            percent: repo::percent(completed, total),
        })
    }
}

/// Insert the completion row and update the enrollment in one transaction
async fn record_completion(
    db: &SqlitePool,
    tenant_id: i64,
    user_id: i64,
    lesson_id: i64,
    enrollment: &Enrollment,
) -> lms_common::Result<bool> {
    let now = Utc::now();
    let mut tx = db.begin().await?;

    let newly = repo::insert_lesson_completion(&mut *tx, tenant_id, user_id, lesson_id, now).await?;
    let (completed, total) = repo::program_counts(&mut *tx, tenant_id, user_id, enrollment.program_id).await?;
    let percent = repo::percent(completed, total);

    if percent >= 100 {
        enrollments::mark_completed(&mut *tx, enrollment.id, now).await?;
    } else if percent != enrollment.progress_percent {
        enrollments::set_progress(&mut *tx, enrollment.id, percent).await?;
    }

    tx.commit().await?;
    Ok(newly)
}
