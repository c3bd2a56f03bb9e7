//! Test attempts: start, submit, score
//!
//! Submission runs in one transaction: re-read the attempt, check its
//! state and deadline, score, store the attempt and raise the best result.
//! A passing submission then marks the test's lesson complete.

use super::{CurrentUser, ProgressService, ServiceError, ServiceResult};
use crate::db::{catalog, enrollments, quizzes as repo};
use chrono::Utc;
use lms_common::db::{
    AnswerOption, AttemptStatus, EnrollmentStatus, Question, SubmittedAnswer, Test, TestAttempt,
    TestResult,
};
use lms_common::events::{EventBus, LmsEvent};
use lms_common::time::add_minutes;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub answers: Vec<SubmittedAnswer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptOutcome {
    pub attempt: TestAttempt,
    pub earned_points: i64,
    pub total_points: i64,
    pub best_score: i64,
    /// True when this attempt became the new best result
    pub improved: bool,
}

#[derive(Clone)]
pub struct TestAttemptService {
    db: SqlitePool,
    events: EventBus,
    progress: ProgressService,
}

impl TestAttemptService {
    pub fn new(db: SqlitePool, events: EventBus, progress: ProgressService) -> Self {
        Self { db, events, progress }
    }

    pub async fn start_attempt(&self, user: &CurrentUser, test_id: i64) -> ServiceResult<TestAttempt> {
        let test = self.test(user.tenant_id, test_id).await?;
        self.require_active_enrollment(user, &test).await?;

        let now = Utc::now();
        if matches!(test.opens_at, Some(opens) if now < opens) {
            return Err(ServiceError::bad_request("Test is not open yet"));
        }
        if matches!(test.closes_at, Some(closes) if now >= closes) {
            return Err(ServiceError::bad_request("Test is closed"));
        }

        let mut tx = self.db.begin().await?;

        let attempts = repo::list_attempts(&mut *tx, test.id, user.user_id).await?;
        if attempts.iter().any(|a| a.status == AttemptStatus::InProgress) {
            return Err(ServiceError::conflict("An attempt is already in progress"));
        }
        if let Some(max) = test.max_attempts {
            if attempts.len() as i64 >= max {
                return Err(ServiceError::bad_request(format!(
                    "Maximum of {} attempts reached",
                    max
                )));
            }
        }

        let deadline = test.time_limit_minutes.map(|m| add_minutes(now, m));
        let attempt =
            repo::insert_attempt(&mut *tx, user.tenant_id, test.id, user.user_id, now, deadline).await?;
        tx.commit().await?;

        info!(
            tenant_id = user.tenant_id,
            attempt_id = attempt.id,
            test_id = test.id,
            user_id = user.user_id,
            "Test attempt started"
        );
        Ok(attempt)
    }

    /// Score a submission
    ///
    /// Past the deadline the attempt is marked expired and the call fails
    /// with BadRequest; the expiry is kept.
    pub async fn submit_attempt(
        &self,
        user: &CurrentUser,
        attempt_id: i64,
        request: SubmitRequest,
    ) -> ServiceResult<AttemptOutcome> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let attempt = repo::find_attempt(&mut *tx, user.tenant_id, attempt_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Attempt {} not found", attempt_id)))?;
        if attempt.user_id != user.user_id {
            return Err(ServiceError::forbidden("Not your attempt"));
        }
        match attempt.status {
            AttemptStatus::InProgress => {}
            AttemptStatus::Expired => return Err(expired()),
            AttemptStatus::Submitted => {
                return Err(ServiceError::conflict("Attempt was already submitted"))
            }
        }

        if matches!(attempt.deadline_at, Some(deadline) if now > deadline) {
            repo::mark_attempt_expired(&mut *tx, attempt.id).await?;
            tx.commit().await?;
            warn!(tenant_id = user.tenant_id, attempt_id, "Submission after deadline");
            return Err(expired());
        }

        let test = repo::find_test(&mut *tx, user.tenant_id, attempt.test_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Test {} not found", attempt.test_id)))?;
        let questions = repo::list_questions(&mut *tx, test.id).await?;
        let options = repo::list_options_for_test(&mut *tx, test.id).await?;

        let answers = normalize_answers(&questions, &options, request.answers)?;
        let (earned, total) = score_answers(&questions, &options, &answers);
        let score = percent_score(earned, total);
        let passed = score >= test.passing_score;

        repo::complete_attempt(&mut *tx, attempt.id, now, score, passed, &answers).await?;

        let (best_score, improved) = match repo::find_result(&mut *tx, test.id, user.user_id).await? {
            None => {
                repo::insert_result(&mut *tx, user.tenant_id, test.id, user.user_id, score, passed, attempt.id)
                    .await?;
                (score, true)
            }
            Some(result) => {
                if repo::raise_result(&mut *tx, result.id, score, passed, attempt.id).await? {
                    (score, true)
                } else {
                    (result.best_score, false)
                }
            }
        };

        let attempt = repo::find_attempt(&mut *tx, user.tenant_id, attempt.id)
            .await?
            .ok_or_else(|| ServiceError::internal("Submitted attempt vanished"))?;
        tx.commit().await?;

        info!(
            tenant_id = user.tenant_id,
            attempt_id,
            test_id = test.id,
            score,
            passed,
            best_score,
            "Test attempt submitted"
        );

        self.events.emit_lossy(LmsEvent::AttemptSubmitted {
            tenant_id: user.tenant_id,
            attempt_id,
            test_id: test.id,
            user_id: user.user_id,
            score_percent: score,
            passed,
            timestamp: now,
        });

        if passed {
            self.progress.complete_lesson(user, test.lesson_id).await?;
        }

        Ok(AttemptOutcome {
            attempt,
            earned_points: earned,
            total_points: total,
            best_score,
            improved,
        })
    }

    pub async fn best_result(&self, user: &CurrentUser, test_id: i64) -> ServiceResult<TestResult> {
        self.test(user.tenant_id, test_id).await?;
        repo::find_result(&self.db, test_id, user.user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("No result for this test yet"))
    }

    pub async fn list_attempts(&self, user: &CurrentUser, test_id: i64) -> ServiceResult<Vec<TestAttempt>> {
        self.test(user.tenant_id, test_id).await?;
        Ok(repo::list_attempts(&self.db, test_id, user.user_id).await?)
    }

    async fn test(&self, tenant_id: i64, id: i64) -> ServiceResult<Test> {
        repo::find_test(&self.db, tenant_id, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Test {} not found", id)))
    }

    async fn require_active_enrollment(&self, user: &CurrentUser, test: &Test) -> ServiceResult<()> {
        let program_id = catalog::program_id_for_lesson(&self.db, user.tenant_id, test.lesson_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Test lesson is no longer available"))?;

        match enrollments::find_open_enrollment(&self.db, user.tenant_id, user.user_id, program_id).await? {
            Some(e) if e.status == EnrollmentStatus::Active => Ok(()),
            _ => Err(ServiceError::forbidden("An active enrollment in the program is required")),
        }
    }
}

fn expired() -> ServiceError {
    ServiceError::bad_request("Attempt has expired")
}

/// Validate submitted answers against the test and merge duplicates
///
/// Unknown questions or options are rejected; unanswered questions score
/// zero.
fn normalize_answers(
    questions: &[Question],
    options: &[AnswerOption],
    answers: Vec<SubmittedAnswer>,
) -> ServiceResult<Vec<SubmittedAnswer>> {
    let mut merged: HashMap<i64, BTreeSet<i64>> = HashMap::new();

    for answer in answers {
        if !questions.iter().any(|q| q.id == answer.question_id) {
            return Err(ServiceError::bad_request(format!(
                "Question {} is not part of this test",
                answer.question_id
            )));
        }
        for option_id in &answer.option_ids {
            if !options
                .iter()
                .any(|o| o.id == *option_id && o.question_id == answer.question_id)
            {
                return Err(ServiceError::bad_request(format!(
                    "Option {} does not belong to question {}",
                    option_id, answer.question_id
                )));
            }
        }
        merged
            .entry(answer.question_id)
            .or_default()
            .extend(answer.option_ids);
    }

    Ok(questions
        .iter()
        .filter_map(|q| {
            merged.remove(&q.id).map(|ids| SubmittedAnswer {
                question_id: q.id,
                option_ids: ids.into_iter().collect(),
            })
        })
        .collect())
}

/// Earned and total points; a question scores only on an exact match
pub fn score_answers(questions: &[Question], options: &[AnswerOption], answers: &[SubmittedAnswer]) -> (i64, i64) {
    let mut earned = 0;
    let mut total = 0;

    for question in questions {
        total += question.points;

        let correct: BTreeSet<i64> = options
            .iter()
            .filter(|o| o.question_id == question.id && o.is_correct)
            .map(|o| o.id)
            .collect();
        let selected: BTreeSet<i64> = answers
            .iter()
            .filter(|a| a.question_id == question.id)
            .flat_map(|a| a.option_ids.iter().copied())
            .collect();

        if !correct.is_empty() && selected == correct {
            earned += question.points;
        }
    }

    (earned, total)
}

/// Percentage rounded down; a test without points scores 0
pub fn percent_score(earned: i64, total: i64) -> i64 {
    if total <= 0 {
        0
    } else {
        earned * 100 / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::enrollments::EnrollRequest;
    use crate::services::test_support::{fixture, sample_test_request, seed_lesson, Fixture};
    use crate::services::quizzes::{CreateTestRequest, TestView};
    use lms_common::api::ErrorKind;
    use lms_common::db::QuestionKind;

    fn question(id: i64, points: i64) -> Question {
        Question {
            id,
            test_id: 1,
            prompt: format!("Q{}", id),
            kind: QuestionKind::Multiple,
            points,
            position: id,
        }
    }

    fn option(id: i64, question_id: i64, is_correct: bool) -> AnswerOption {
        AnswerOption {
            id,
            question_id,
            text: format!("O{}", id),
            is_correct,
            position: id,
        }
    }

    #[test]
    fn test_partial_selection_earns_nothing() {
        let questions = vec![question(1, 2), question(2, 3)];
        let options = vec![
            option(10, 1, true),
            option(11, 1, false),
            option(20, 2, true),
            option(21, 2, true),
        ];
        let answers = vec![
            SubmittedAnswer { question_id: 1, option_ids: vec![10] },
            SubmittedAnswer { question_id: 2, option_ids: vec![20] },
        ];

        assert_eq!(score_answers(&questions, &options, &answers), (2, 5));
        assert_eq!(percent_score(2, 5), 40);
    }

    #[test]
    fn test_extra_selection_earns_nothing() {
        let questions = vec![question(1, 1)];
        let options = vec![option(10, 1, true), option(11, 1, false)];
        let answers = vec![SubmittedAnswer { question_id: 1, option_ids: vec![10, 11] }];

        assert_eq!(score_answers(&questions, &options, &answers), (0, 1));
    }

    #[test]
    fn test_percent_rounds_down() {
        assert_eq!(percent_score(2, 3), 66);
        assert_eq!(percent_score(0, 0), 0);
    }

    struct Scenario {
        view: TestView,
        course_id: i64,
    }

    impl Scenario {
        fn correct_answers(&self) -> Vec<SubmittedAnswer> {
            self.answers(true)
        }

        fn wrong_answers(&self) -> Vec<SubmittedAnswer> {
            self.answers(false)
        }

        fn answers(&self, correct: bool) -> Vec<SubmittedAnswer> {
            self.view
                .questions
                .iter()
                .map(|q| SubmittedAnswer {
                    question_id: q.id,
                    option_ids: q
                        .options
                        .iter()
                        .filter(|o| o.is_correct == Some(correct))
                        .map(|o| o.id)
                        .collect(),
                })
                .collect()
        }
    }

    async fn scenario(fx: &Fixture, time_limit: Option<i64>) -> Scenario {
        scenario_with(fx, |request| request.time_limit_minutes = time_limit).await
    }

    async fn scenario_with(fx: &Fixture, customize: impl FnOnce(&mut CreateTestRequest)) -> Scenario {
        let lesson = seed_lesson(fx, "P1", 0).await;
        let mut request = sample_test_request(lesson.id);
        customize(&mut request);
        let view = fx.tests.create_test(&fx.admin, request).await.unwrap();

        let program_id = catalog::program_id_for_lesson(&fx.db, fx.tenant_id, lesson.id)
            .await
            .unwrap()
            .unwrap();
        fx.enrollments
            .enroll(&fx.student, EnrollRequest { program_id, user_id: None })
            .await
            .unwrap();

        Scenario {
            view,
            course_id: lesson.course_id,
        }
    }

    #[tokio::test]
    async fn test_submit_after_deadline_is_bad_request() {
        let fx = fixture().await;
        let scenario = scenario(&fx, Some(10)).await;
        let attempt = fx
            .attempts
            .start_attempt(&fx.student, scenario.view.test.id)
            .await
            .unwrap();

        sqlx::query("UPDATE test_attempts SET deadline_at = ? WHERE id = ?")
            .bind(Utc::now() - chrono::Duration::minutes(1))
            .bind(attempt.id)
            .execute(&fx.db)
            .await
            .unwrap();

        let err = fx
            .attempts
            .submit_attempt(&fx.student, attempt.id, SubmitRequest { answers: scenario.correct_answers() })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let stored = repo::find_attempt(&fx.db, fx.tenant_id, attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AttemptStatus::Expired);

        let err = fx
            .attempts
            .submit_attempt(&fx.student, attempt.id, SubmitRequest { answers: vec![] })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_max_attempts_is_enforced() {
        let fx = fixture().await;
        let scenario = scenario_with(&fx, |request| request.max_attempts = Some(1)).await;
        let test_id = scenario.view.test.id;

        let attempt = fx.attempts.start_attempt(&fx.student, test_id).await.unwrap();
        fx.attempts
            .submit_attempt(&fx.student, attempt.id, SubmitRequest { answers: scenario.wrong_answers() })
            .await
            .unwrap();

        let err = fx.attempts.start_attempt(&fx.student, test_id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(fx.attempts.list_attempts(&fx.student, test_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_test_cannot_be_started() {
        let fx = fixture().await;
        let scenario = scenario_with(&fx, |request| {
            request.opens_at = Some(Utc::now() - chrono::Duration::days(2));
            request.closes_at = Some(Utc::now() - chrono::Duration::days(1));
        })
        .await;

        let err = fx
            .attempts
            .start_attempt(&fx.student, scenario.view.test.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.message, "Test is closed");
    }

    #[tokio::test]
    async fn test_test_not_open_yet_cannot_be_started() {
        let fx = fixture().await;
        let scenario = scenario_with(&fx, |request| {
            request.opens_at = Some(Utc::now() + chrono::Duration::days(1));
        })
        .await;

        let err = fx
            .attempts
            .start_attempt(&fx.student, scenario.view.test.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.message, "Test is not open yet");
    }

    #[tokio::test]
    async fn test_best_score_only_rises() {
        let fx = fixture().await;
        let scenario = scenario(&fx, None).await;
        let test_id = scenario.view.test.id;

        let first = fx.attempts.start_attempt(&fx.student, test_id).await.unwrap();
        let outcome = fx
            .attempts
            .submit_attempt(&fx.student, first.id, SubmitRequest { answers: scenario.wrong_answers() })
            .await
            .unwrap();
        assert_eq!(outcome.attempt.score_percent, Some(0));
        assert!(outcome.improved);

        let second = fx.attempts.start_attempt(&fx.student, test_id).await.unwrap();
        let outcome = fx
            .attempts
            .submit_attempt(&fx.student, second.id, SubmitRequest { answers: scenario.correct_answers() })
            .await
            .unwrap();
        assert_eq!(outcome.best_score, 100);
        assert!(outcome.attempt.passed);

        let third = fx.attempts.start_attempt(&fx.student, test_id).await.unwrap();
        let outcome = fx
            .attempts
            .submit_attempt(&fx.student, third.id, SubmitRequest { answers: scenario.wrong_answers() })
            .await
            .unwrap();
        assert!(!outcome.improved);
        assert_eq!(outcome.best_score, 100);

        let best = fx.attempts.best_result(&fx.student, test_id).await.unwrap();
        assert_eq!(best.best_attempt_id, second.id);
    }

    #[tokio::test]
    async fn test_second_open_attempt_is_conflict() {
        let fx = fixture().await;
        let scenario = scenario(&fx, None).await;

        fx.attempts.start_attempt(&fx.student, scenario.view.test.id).await.unwrap();
        let err = fx
            .attempts
            .start_attempt(&fx.student, scenario.view.test.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_start_requires_enrollment() {
        let fx = fixture().await;
        let lesson = seed_lesson(&fx, "P1", 0).await;
        let view = fx
            .tests
            .create_test(&fx.admin, sample_test_request(lesson.id))
            .await
            .unwrap();

        let err = fx.attempts.start_attempt(&fx.student, view.test.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_passing_completes_lesson() {
        let fx = fixture().await;
        let scenario = scenario(&fx, None).await;
        let attempt = fx
            .attempts
            .start_attempt(&fx.student, scenario.view.test.id)
            .await
            .unwrap();

        fx.attempts
            .submit_attempt(&fx.student, attempt.id, SubmitRequest { answers: scenario.correct_answers() })
            .await
            .unwrap();

        let progress = fx
            .progress
            .course_progress(&fx.student, scenario.course_id)
            .await
            .unwrap();
        assert_eq!(progress.completed_lessons, 1);
        assert_eq!(progress.total_lessons, 2);
        assert_eq!(progress.percent, 50);
    }
}
