//! Test authoring
//!
//! A test belongs to a lesson and is created together with its questions
//! and answer options in one transaction. Single-choice questions need
//! exactly one correct option, multiple-choice questions at least one.

use super::{require_text, CurrentUser, ServiceError, ServiceResult};
use crate::db::{catalog, quizzes as repo};
use chrono::{DateTime, Utc};
use lms_common::db::{AnswerOption, Question, QuestionKind, Test};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct OptionInput {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionInput {
    pub prompt: String,
    pub kind: QuestionKind,
    #[serde(default = "default_points")]
    pub points: i64,
    pub options: Vec<OptionInput>,
}

fn default_points() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTestRequest {
    pub lesson_id: i64,
    pub title: String,
    pub passing_score: i64,
    #[serde(default)]
    pub time_limit_minutes: Option<i64>,
    #[serde(default)]
    pub max_attempts: Option<i64>,
    #[serde(default)]
    pub opens_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closes_at: Option<DateTime<Utc>>,
    pub questions: Vec<QuestionInput>,
}

/// Option as shown to a test taker; correctness only for authors
#[derive(Debug, Clone, Serialize)]
pub struct OptionView {
    pub id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: i64,
    pub prompt: String,
    pub kind: QuestionKind,
    pub points: i64,
    pub options: Vec<OptionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestView {
    #[serde(flatten)]
    pub test: Test,
    pub questions: Vec<QuestionView>,
}

#[derive(Clone)]
pub struct TestService {
    db: SqlitePool,
}

impl TestService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create_test(&self, user: &CurrentUser, request: CreateTestRequest) -> ServiceResult<TestView> {
        user.require_author()?;

        let title = require_text(&request.title, "title")?;
        validate_test_settings(&request)?;
        for (index, question) in request.questions.iter().enumerate() {
            validate_question(index + 1, question)?;
        }

        catalog::find_lesson(&self.db, user.tenant_id, request.lesson_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Lesson {} not found", request.lesson_id)))?;

        let mut tx = self.db.begin().await?;

        let test_id = repo::insert_test(
            &mut *tx,
            user.tenant_id,
            &repo::TestFields {
                lesson_id: request.lesson_id,
                title,
                passing_score: request.passing_score,
                time_limit_minutes: request.time_limit_minutes,
                max_attempts: request.max_attempts,
                opens_at: request.opens_at,
                closes_at: request.closes_at,
            },
        )
        .await?;

        for (q_pos, question) in request.questions.iter().enumerate() {
            let question_id = repo::insert_question(
                &mut *tx,
                user.tenant_id,
                test_id,
                question.prompt.trim(),
                question.kind,
                question.points,
                q_pos as i64 + 1,
            )
            .await?;

            for (o_pos, option) in question.options.iter().enumerate() {
                repo::insert_option(
                    &mut *tx,
                    user.tenant_id,
                    question_id,
                    option.text.trim(),
                    option.is_correct,
                    o_pos as i64 + 1,
                )
                .await?;
            }
        }

        tx.commit().await?;

        info!(
            tenant_id = user.tenant_id,
            test_id,
            lesson_id = request.lesson_id,
            questions = request.questions.len(),
            "Test created"
        );

        self.get_test(user, test_id).await
    }

    /// Test with its questions; answers are hidden from students
    pub async fn get_test(&self, user: &CurrentUser, id: i64) -> ServiceResult<TestView> {
        let test = repo::find_test(&self.db, user.tenant_id, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Test {} not found", id)))?;
        let questions = repo::list_questions(&self.db, id).await?;
        let options = repo::list_options_for_test(&self.db, id).await?;

        Ok(build_view(test, questions, options, user.role.can_author()))
    }

    pub async fn list_for_lesson(&self, user: &CurrentUser, lesson_id: i64) -> ServiceResult<Vec<Test>> {
        Ok(repo::list_tests_for_lesson(&self.db, user.tenant_id, lesson_id).await?)
    }
}

fn validate_test_settings(request: &CreateTestRequest) -> ServiceResult<()> {
    if !(0..=100).contains(&request.passing_score) {
        return Err(ServiceError::bad_request("passing_score must be between 0 and 100"));
    }
    if matches!(request.time_limit_minutes, Some(m) if m <= 0) {
        return Err(ServiceError::bad_request("time_limit_minutes must be positive"));
    }
    if matches!(request.max_attempts, Some(n) if n <= 0) {
        return Err(ServiceError::bad_request("max_attempts must be positive"));
    }
    if let (Some(opens), Some(closes)) = (request.opens_at, request.closes_at) {
        if closes <= opens {
            return Err(ServiceError::bad_request("closes_at must be after opens_at"));
        }
    }
    if request.questions.is_empty() {
        return Err(ServiceError::bad_request("A test needs at least one question"));
    }
    Ok(())
}

fn validate_question(number: usize, question: &QuestionInput) -> ServiceResult<()> {
    require_text(&question.prompt, &format!("question {} prompt", number))?;
    if question.points <= 0 {
        return Err(ServiceError::bad_request(format!(
            "Question {}: points must be positive",
            number
        )));
    }
    if question.options.len() < 2 {
        return Err(ServiceError::bad_request(format!(
            "Question {}: at least two options are required",
            number
        )));
    }
    if question.options.iter().any(|o| o.text.trim().is_empty()) {
        return Err(ServiceError::bad_request(format!(
            "Question {}: option text is required",
            number
        )));
    }

    let correct = question.options.iter().filter(|o| o.is_correct).count();
    match question.kind {
        QuestionKind::Single if correct != 1 => Err(ServiceError::bad_request(format!(
            "Question {}: single-choice questions need exactly one correct option",
            number
        ))),
        QuestionKind::Multiple if correct == 0 => Err(ServiceError::bad_request(format!(
            "Question {}: multiple-choice questions need at least one correct option",
            number
        ))),
        _ => Ok(()),
    }
}

fn build_view(
    test: Test,
    questions: Vec<Question>,
    options: Vec<AnswerOption>,
    reveal_answers: bool,
) -> TestView {
    let questions = questions
        .into_iter()
        .map(|q| QuestionView {
            options: options
                .iter()
                .filter(|o| o.question_id == q.id)
                .map(|o| OptionView {
                    id: o.id,
                    text: o.text.clone(),
                    is_correct: reveal_answers.then_some(o.is_correct),
                })
                .collect(),
            id: q.id,
            prompt: q.prompt,
            kind: q.kind,
            points: q.points,
        })
        .collect();

    TestView { test, questions }
}

#[cfg(test)]
mod tests {
    use crate::services::test_support::{fixture, sample_test_request, seed_lesson};
    use lms_common::api::ErrorKind;

    #[tokio::test]
    async fn test_create_test_with_questions() {
        let fx = fixture().await;
        let lesson = seed_lesson(&fx, "P1", 0).await;

        let view = fx
            .tests
            .create_test(&fx.admin, sample_test_request(lesson.id))
            .await
            .unwrap();
        assert_eq!(view.questions.len(), 2);
        assert_eq!(view.questions[1].options.len(), 3);
        assert_eq!(view.questions[0].options[0].is_correct, Some(true));
    }

    #[tokio::test]
    async fn test_students_do_not_see_answers() {
        let fx = fixture().await;
        let lesson = seed_lesson(&fx, "P1", 0).await;
        let created = fx
            .tests
            .create_test(&fx.admin, sample_test_request(lesson.id))
            .await
            .unwrap();

        let view = fx.tests.get_test(&fx.student, created.test.id).await.unwrap();
        assert!(view
            .questions
            .iter()
            .flat_map(|q| q.options.iter())
            .all(|o| o.is_correct.is_none()));
    }

    #[tokio::test]
    async fn test_single_choice_needs_exactly_one_correct() {
        let fx = fixture().await;
        let lesson = seed_lesson(&fx, "P1", 0).await;
        let mut request = sample_test_request(lesson.id);
        request.questions[0].options[1].is_correct = true;

        let err = fx.tests.create_test(&fx.admin, request).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_multiple_choice_needs_a_correct_option() {
        let fx = fixture().await;
        let lesson = seed_lesson(&fx, "P1", 0).await;
        let mut request = sample_test_request(lesson.id);
        for option in &mut request.questions[1].options {
            option.is_correct = false;
        }

        let err = fx.tests.create_test(&fx.admin, request).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_passing_score_range() {
        let fx = fixture().await;
        let lesson = seed_lesson(&fx, "P1", 0).await;
        let mut request = sample_test_request(lesson.id);
        request.passing_score = 101;

        let err = fx.tests.create_test(&fx.admin, request).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }
}
