//! Tests, questions, answer options, attempts and best results

use chrono::{DateTime, Utc};
use lms_common::db::{
    AnswerOption, AttemptStatus, Question, QuestionKind, SubmittedAnswer, Test, TestAttempt,
    TestResult,
};
use lms_common::Result;
use sqlx::types::Json;
use sqlx::{SqliteExecutor, SqlitePool};

const TEST_COLUMNS: &str = "id, tenant_id, lesson_id, title, passing_score, time_limit_minutes, \
     max_attempts, opens_at, closes_at, created_at, updated_at";

const ATTEMPT_COLUMNS: &str = "id, tenant_id, test_id, user_id, status, started_at, deadline_at, \
     submitted_at, score_percent, passed, answers";

#[derive(Debug, Clone)]
pub struct TestFields {
    pub lesson_id: i64,
    pub title: String,
    pub passing_score: i64,
    pub time_limit_minutes: Option<i64>,
    pub max_attempts: Option<i64>,
    pub opens_at: Option<DateTime<Utc>>,
    pub closes_at: Option<DateTime<Utc>>,
}

pub async fn insert_test<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    fields: &TestFields,
) -> Result<i64> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO tests (
            tenant_id, lesson_id, title, passing_score, time_limit_minutes,
            max_attempts, opens_at, closes_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(tenant_id)
    .bind(fields.lesson_id)
    .bind(&fields.title)
    .bind(fields.passing_score)
    .bind(fields.time_limit_minutes)
    .bind(fields.max_attempts)
    .bind(fields.opens_at)
    .bind(fields.closes_at)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn insert_question<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    test_id: i64,
    prompt: &str,
    kind: QuestionKind,
    points: i64,
    position: i64,
) -> Result<i64> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO questions (
            tenant_id, test_id, prompt, kind, points, position, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(tenant_id)
    .bind(test_id)
    .bind(prompt)
    .bind(kind)
    .bind(points)
    .bind(position)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn insert_option<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    question_id: i64,
    text: &str,
    is_correct: bool,
    position: i64,
) -> Result<i64> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO answer_options (
            tenant_id, question_id, text, is_correct, position, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(tenant_id)
    .bind(question_id)
    .bind(text)
    .bind(is_correct)
    .bind(position)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn find_test<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    id: i64,
) -> Result<Option<Test>> {
    let test = sqlx::query_as::<_, Test>(&format!(
        "SELECT {} FROM tests WHERE tenant_id = ? AND id = ? AND is_deleted = 0",
        TEST_COLUMNS
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(test)
}

pub async fn list_tests_for_lesson(pool: &SqlitePool, tenant_id: i64, lesson_id: i64) -> Result<Vec<Test>> {
    let tests = sqlx::query_as::<_, Test>(&format!(
        "SELECT {} FROM tests WHERE tenant_id = ? AND lesson_id = ? AND is_deleted = 0 ORDER BY id",
        TEST_COLUMNS
    ))
    .bind(tenant_id)
    .bind(lesson_id)
    .fetch_all(pool)
    .await?;
    Ok(tests)
}

pub async fn list_questions<'e, E: SqliteExecutor<'e>>(executor: E, test_id: i64) -> Result<Vec<Question>> {
    let questions = sqlx::query_as::<_, Question>(
        "SELECT id, test_id, prompt, kind, points, position FROM questions \
         WHERE test_id = ? AND is_deleted = 0 ORDER BY position, id",
    )
    .bind(test_id)
    .fetch_all(executor)
    .await?;
    Ok(questions)
}

/// Every live option of every question of a test
pub async fn list_options_for_test<'e, E: SqliteExecutor<'e>>(
    executor: E,
    test_id: i64,
) -> Result<Vec<AnswerOption>> {
    let options = sqlx::query_as::<_, AnswerOption>(
        r#"
        SELECT o.id, o.question_id, o.text, o.is_correct, o.position
        FROM answer_options o
        JOIN questions q ON q.id = o.question_id
        WHERE q.test_id = ? AND q.is_deleted = 0 AND o.is_deleted = 0
        ORDER BY o.question_id, o.position, o.id
        "#,
    )
    .bind(test_id)
    .fetch_all(executor)
    .await?;
    Ok(options)
}

// ----------------------------------------------------------------------------
// Attempts
// ----------------------------------------------------------------------------

pub async fn insert_attempt<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    test_id: i64,
    user_id: i64,
    started_at: DateTime<Utc>,
    deadline_at: Option<DateTime<Utc>>,
) -> Result<TestAttempt> {
    let id = sqlx::query(
        r#"
        INSERT INTO test_attempts (
            tenant_id, test_id, user_id, status, started_at, deadline_at,
            answers, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, '[]', ?, ?)
        "#,
    )
    .bind(tenant_id)
    .bind(test_id)
    .bind(user_id)
    .bind(AttemptStatus::InProgress)
    .bind(started_at)
    .bind(deadline_at)
    .bind(started_at)
    .bind(started_at)
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(TestAttempt {
        id,
        tenant_id,
        test_id,
        user_id,
        status: AttemptStatus::InProgress,
        started_at,
        deadline_at,
        submitted_at: None,
        score_percent: None,
        passed: false,
        answers: Json(Vec::new()),
    })
}

pub async fn find_attempt<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    id: i64,
) -> Result<Option<TestAttempt>> {
    let attempt = sqlx::query_as::<_, TestAttempt>(&format!(
        "SELECT {} FROM test_attempts WHERE tenant_id = ? AND id = ? AND is_deleted = 0",
        ATTEMPT_COLUMNS
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(attempt)
}

pub async fn list_attempts<'e, E: SqliteExecutor<'e>>(
    executor: E,
    test_id: i64,
    user_id: i64,
) -> Result<Vec<TestAttempt>> {
    let attempts = sqlx::query_as::<_, TestAttempt>(&format!(
        "SELECT {} FROM test_attempts \
         WHERE test_id = ? AND user_id = ? AND is_deleted = 0 ORDER BY started_at, id",
        ATTEMPT_COLUMNS
    ))
    .bind(test_id)
    .bind(user_id)
    .fetch_all(executor)
    .await?;
    Ok(attempts)
}

/// Record the outcome of a scored attempt
pub async fn complete_attempt<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
    submitted_at: DateTime<Utc>,
    score_percent: i64,
    passed: bool,
    answers: &[SubmittedAnswer],
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE test_attempts
        SET status = ?, submitted_at = ?, score_percent = ?, passed = ?, answers = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(AttemptStatus::Submitted)
    .bind(submitted_at)
    .bind(score_percent)
    .bind(passed)
    .bind(Json(answers))
    .bind(submitted_at)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn mark_attempt_expired<'e, E: SqliteExecutor<'e>>(executor: E, id: i64) -> Result<()> {
    sqlx::query("UPDATE test_attempts SET status = ?, updated_at = ? WHERE id = ?")
        .bind(AttemptStatus::Expired)
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

// ----------------------------------------------------------------------------
// Best results
// ----------------------------------------------------------------------------

pub async fn find_result<'e, E: SqliteExecutor<'e>>(
    executor: E,
    test_id: i64,
    user_id: i64,
) -> Result<Option<TestResult>> {
    let result = sqlx::query_as::<_, TestResult>(
        "SELECT id, test_id, user_id, best_score, passed, best_attempt_id, updated_at \
         FROM test_results WHERE test_id = ? AND user_id = ? AND is_deleted = 0",
    )
    .bind(test_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?;
    Ok(result)
}

pub async fn insert_result<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    test_id: i64,
    user_id: i64,
    best_score: i64,
    passed: bool,
    attempt_id: i64,
) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO test_results (
            tenant_id, test_id, user_id, best_score, passed, best_attempt_id,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(tenant_id)
    .bind(test_id)
    .bind(user_id)
    .bind(best_score)
    .bind(passed)
    .bind(attempt_id)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

/// Replace the best result, only when `best_score` is strictly higher
///
/// Returns whether the row changed.
pub async fn raise_result<'e, E: SqliteExecutor<'e>>(
    executor: E,
    result_id: i64,
    best_score: i64,
    passed: bool,
    attempt_id: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE test_results
        SET best_score = ?, passed = ?, best_attempt_id = ?, updated_at = ?
        WHERE id = ? AND best_score < ?
        "#,
    )
    .bind(best_score)
    .bind(passed)
    .bind(attempt_id)
    .bind(Utc::now())
    .bind(result_id)
    .bind(best_score)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}
