//! Program, course and lesson persistence

use chrono::Utc;
use lms_common::db::{Course, Lesson, Program};
use lms_common::Result;
use sqlx::{SqliteExecutor, SqlitePool};

const PROGRAM_COLUMNS: &str = "id, tenant_id, code, title, description, price_cents, currency, \
     is_published, created_at, updated_at";

const COURSE_COLUMNS: &str = "id, tenant_id, program_id, code, title, position, created_at, updated_at";

const LESSON_COLUMNS: &str = "id, tenant_id, course_id, code, title, content, position, \
     duration_minutes, created_at, updated_at";

/// Mark a row soft-deleted
///
/// `table` must be one of the static table names of this module's callers.
pub async fn soft_delete<'e, E: SqliteExecutor<'e>>(
    executor: E,
    table: &'static str,
    tenant_id: i64,
    id: i64,
) -> Result<bool> {
    let now = Utc::now();
    let result = sqlx::query(&format!(
        "UPDATE {} SET is_deleted = 1, deleted_at = ?, updated_at = ? \
         WHERE tenant_id = ? AND id = ? AND is_deleted = 0",
        table
    ))
    .bind(now)
    .bind(now)
    .bind(tenant_id)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ----------------------------------------------------------------------------
// Programs
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProgramFields {
    pub code: String,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub currency: String,
    pub is_published: bool,
}

pub async fn insert_program<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    fields: &ProgramFields,
) -> Result<i64> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO programs (
            tenant_id, code, title, description, price_cents, currency,
            is_published, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(tenant_id)
    .bind(&fields.code)
    .bind(&fields.title)
    .bind(&fields.description)
    .bind(fields.price_cents)
    .bind(&fields.currency)
    .bind(fields.is_published)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn update_program<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    id: i64,
    fields: &ProgramFields,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE programs
        SET code = ?, title = ?, description = ?, price_cents = ?, currency = ?,
            is_published = ?, updated_at = ?
        WHERE tenant_id = ? AND id = ? AND is_deleted = 0
        "#,
    )
    .bind(&fields.code)
    .bind(&fields.title)
    .bind(&fields.description)
    .bind(fields.price_cents)
    .bind(&fields.currency)
    .bind(fields.is_published)
    .bind(Utc::now())
    .bind(tenant_id)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn find_program<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    id: i64,
) -> Result<Option<Program>> {
    let program = sqlx::query_as::<_, Program>(&format!(
        "SELECT {} FROM programs WHERE tenant_id = ? AND id = ? AND is_deleted = 0",
        PROGRAM_COLUMNS
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(program)
}

pub async fn find_program_by_code(
    pool: &SqlitePool,
    tenant_id: i64,
    code: &str,
) -> Result<Option<Program>> {
    let program = sqlx::query_as::<_, Program>(&format!(
        "SELECT {} FROM programs WHERE tenant_id = ? AND code = ? AND is_deleted = 0",
        PROGRAM_COLUMNS
    ))
    .bind(tenant_id)
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(program)
}

pub async fn count_programs(pool: &SqlitePool, tenant_id: i64, published_only: bool) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM programs \
         WHERE tenant_id = ? AND is_deleted = 0 AND (is_published = 1 OR ? = 0)",
    )
    .bind(tenant_id)
    .bind(published_only)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn list_programs(
    pool: &SqlitePool,
    tenant_id: i64,
    published_only: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Program>> {
    let programs = sqlx::query_as::<_, Program>(&format!(
        "SELECT {} FROM programs \
         WHERE tenant_id = ? AND is_deleted = 0 AND (is_published = 1 OR ? = 0) \
         ORDER BY code LIMIT ? OFFSET ?",
        PROGRAM_COLUMNS
    ))
    .bind(tenant_id)
    .bind(published_only)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(programs)
}

// ----------------------------------------------------------------------------
// Courses
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CourseFields {
    pub program_id: i64,
    pub code: String,
    pub title: String,
    pub position: i64,
}

pub async fn insert_course<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    fields: &CourseFields,
) -> Result<i64> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO courses (tenant_id, program_id, code, title, position, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(tenant_id)
    .bind(fields.program_id)
    .bind(&fields.code)
    .bind(&fields.title)
    .bind(fields.position)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn update_course<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    id: i64,
    fields: &CourseFields,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE courses
        SET program_id = ?, code = ?, title = ?, position = ?, updated_at = ?
        WHERE tenant_id = ? AND id = ? AND is_deleted = 0
        "#,
    )
    .bind(fields.program_id)
    .bind(&fields.code)
    .bind(&fields.title)
    .bind(fields.position)
    .bind(Utc::now())
    .bind(tenant_id)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn find_course<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    id: i64,
) -> Result<Option<Course>> {
    let course = sqlx::query_as::<_, Course>(&format!(
        "SELECT {} FROM courses WHERE tenant_id = ? AND id = ? AND is_deleted = 0",
        COURSE_COLUMNS
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(course)
}

pub async fn count_courses(pool: &SqlitePool, tenant_id: i64, program_id: Option<i64>) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM courses \
         WHERE tenant_id = ? AND is_deleted = 0 AND (? IS NULL OR program_id = ?)",
    )
    .bind(tenant_id)
    .bind(program_id)
    .bind(program_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn list_courses(
    pool: &SqlitePool,
    tenant_id: i64,
    program_id: Option<i64>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Course>> {
    let courses = sqlx::query_as::<_, Course>(&format!(
        "SELECT {} FROM courses \
         WHERE tenant_id = ? AND is_deleted = 0 AND (? IS NULL OR program_id = ?) \
         ORDER BY program_id, position, id LIMIT ? OFFSET ?",
        COURSE_COLUMNS
    ))
    .bind(tenant_id)
    .bind(program_id)
    .bind(program_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(courses)
}

// ----------------------------------------------------------------------------
// Lessons
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LessonFields {
    pub course_id: i64,
    pub code: String,
    pub title: String,
    pub content: String,
    pub position: i64,
    pub duration_minutes: i64,
}

pub async fn insert_lesson<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    fields: &LessonFields,
) -> Result<i64> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO lessons (
            tenant_id, course_id, code, title, content, position,
            duration_minutes, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(tenant_id)
    .bind(fields.course_id)
    .bind(&fields.code)
    .bind(&fields.title)
    .bind(&fields.content)
    .bind(fields.position)
    .bind(fields.duration_minutes)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn update_lesson<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    id: i64,
    fields: &LessonFields,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE lessons
        SET course_id = ?, code = ?, title = ?, content = ?, position = ?,
            duration_minutes = ?, updated_at = ?
        WHERE tenant_id = ? AND id = ? AND is_deleted = 0
        "#,
    )
    .bind(fields.course_id)
    .bind(&fields.code)
    .bind(&fields.title)
    .bind(&fields.content)
    .bind(fields.position)
    .bind(fields.duration_minutes)
    .bind(Utc::now())
    .bind(tenant_id)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn find_lesson<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    id: i64,
) -> Result<Option<Lesson>> {
    let lesson = sqlx::query_as::<_, Lesson>(&format!(
        "SELECT {} FROM lessons WHERE tenant_id = ? AND id = ? AND is_deleted = 0",
        LESSON_COLUMNS
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(lesson)
}

pub async fn count_lessons(pool: &SqlitePool, tenant_id: i64, course_id: Option<i64>) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM lessons \
         WHERE tenant_id = ? AND is_deleted = 0 AND (? IS NULL OR course_id = ?)",
    )
    .bind(tenant_id)
    .bind(course_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn list_lessons(
    pool: &SqlitePool,
    tenant_id: i64,
    course_id: Option<i64>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Lesson>> {
    let lessons = sqlx::query_as::<_, Lesson>(&format!(
        "SELECT {} FROM lessons \
         WHERE tenant_id = ? AND is_deleted = 0 AND (? IS NULL OR course_id = ?) \
         ORDER BY course_id, position, id LIMIT ? OFFSET ?",
        LESSON_COLUMNS
    ))
    .bind(tenant_id)
    .bind(course_id)
    .bind(course_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(lessons)
}

/// Program that owns a lesson, through its course
///
/// `None` when the lesson, its course or the program is deleted.
pub async fn program_id_for_lesson<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tenant_id: i64,
    lesson_id: i64,
) -> Result<Option<i64>> {
    let program_id = sqlx::query_scalar(
        r#"
        SELECT p.id
        FROM lessons l
        JOIN courses c ON c.id = l.course_id AND c.is_deleted = 0
        JOIN programs p ON p.id = c.program_id AND p.is_deleted = 0
        WHERE l.tenant_id = ? AND l.id = ? AND l.is_deleted = 0
        "#,
    )
    .bind(tenant_id)
    .bind(lesson_id)
    .fetch_optional(executor)
    .await?;
    Ok(program_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::identity;
    use lms_common::db::init::init_memory_database;

    fn program(code: &str, published: bool) -> ProgramFields {
        ProgramFields {
            code: code.to_string(),
            title: format!("Program {}", code),
            description: String::new(),
            price_cents: 0,
            currency: "USD".to_string(),
            is_published: published,
        }
    }

    #[tokio::test]
    async fn test_list_programs_filters_unpublished_and_deleted() {
        let pool = init_memory_database().await.unwrap();
        let tenant = identity::insert_tenant(&pool, "acme", "Acme", "en").await.unwrap();

        insert_program(&pool, tenant.id, &program("A", true)).await.unwrap();
        insert_program(&pool, tenant.id, &program("B", false)).await.unwrap();
        let c = insert_program(&pool, tenant.id, &program("C", true)).await.unwrap();
        assert!(soft_delete(&pool, "programs", tenant.id, c).await.unwrap());

        assert_eq!(count_programs(&pool, tenant.id, true).await.unwrap(), 1);
        assert_eq!(count_programs(&pool, tenant.id, false).await.unwrap(), 2);

        let all = list_programs(&pool, tenant.id, false, 10, 0).await.unwrap();
        let codes: Vec<_> = all.iter().map(|p| p.code.as_str()).collect();
        assert_eq!(codes, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_program_for_lesson_follows_course() {
        let pool = init_memory_database().await.unwrap();
        let tenant = identity::insert_tenant(&pool, "acme", "Acme", "en").await.unwrap();
        let program_id = insert_program(&pool, tenant.id, &program("P", true)).await.unwrap();
        let course_id = insert_course(
            &pool,
            tenant.id,
            &CourseFields {
                program_id,
                code: "C1".into(),
                title: "Course".into(),
                position: 1,
            },
        )
        .await
        .unwrap();
        let lesson_id = insert_lesson(
            &pool,
            tenant.id,
            &LessonFields {
                course_id,
                code: "L1".into(),
                title: "Lesson".into(),
                content: String::new(),
                position: 1,
                duration_minutes: 10,
            },
        )
        .await
        .unwrap();

        assert_eq!(
            program_id_for_lesson(&pool, tenant.id, lesson_id).await.unwrap(),
            Some(program_id)
        );

        soft_delete(&pool, "courses", tenant.id, course_id).await.unwrap();
        assert_eq!(program_id_for_lesson(&pool, tenant.id, lesson_id).await.unwrap(), None);
    }
}
