//! Programs, courses and lessons
//!
//! Authoring needs the instructor or admin role. Students only see
//! published programs; courses and lessons are visible to any member of
//! the tenant.

use super::{require_text, CurrentUser, ServiceError, ServiceResult};
use crate::db::catalog::{self as repo, CourseFields, LessonFields, ProgramFields};
use crate::pagination::{calculate_pagination, Page, PageRequest};
use lms_common::db::{Course, Lesson, Program};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramInput {
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price_cents: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub is_published: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CourseInput {
    pub program_id: i64,
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub position: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LessonInput {
    pub course_id: i64,
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub duration_minutes: i64,
}

#[derive(Clone)]
pub struct CatalogService {
    db: SqlitePool,
}

impl CatalogService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    // ------------------------------------------------------------------
    // Programs
    // ------------------------------------------------------------------

    pub async fn create_program(&self, user: &CurrentUser, input: ProgramInput) -> ServiceResult<Program> {
        user.require_author()?;
        let fields = program_fields(input)?;

        if repo::find_program_by_code(&self.db, user.tenant_id, &fields.code)
            .await?
            .is_some()
        {
            return Err(ServiceError::conflict(format!(
                "Program code '{}' already exists",
                fields.code
            )));
        }

        let id = repo::insert_program(&self.db, user.tenant_id, &fields).await?;
        info!(tenant_id = user.tenant_id, program_id = id, code = %fields.code, "Program created");
        self.program(user.tenant_id, id).await
    }

    pub async fn get_program(&self, user: &CurrentUser, id: i64) -> ServiceResult<Program> {
        let program = self.program(user.tenant_id, id).await?;
        if !program.is_published && !user.role.can_author() {
            return Err(ServiceError::not_found(format!("Program {} not found", id)));
        }
        Ok(program)
    }

    pub async fn list_programs(&self, user: &CurrentUser, page: PageRequest) -> ServiceResult<Page<Program>> {
        let published_only = !user.role.can_author();
        let total = repo::count_programs(&self.db, user.tenant_id, published_only).await?;
        let pagination = calculate_pagination(total, page);
        let items = repo::list_programs(
            &self.db,
            user.tenant_id,
            published_only,
            pagination.page_size,
            pagination.offset,
        )
        .await?;
        Ok(Page::new(items, total, pagination))
    }

    pub async fn update_program(
        &self,
        user: &CurrentUser,
        id: i64,
        input: ProgramInput,
    ) -> ServiceResult<Program> {
        user.require_author()?;
        let existing = self.program(user.tenant_id, id).await?;
        let fields = program_fields(input)?;

        if fields.code != existing.code {
            if let Some(other) = repo::find_program_by_code(&self.db, user.tenant_id, &fields.code).await? {
                if other.id != id {
                    return Err(ServiceError::conflict(format!(
                        "Program code '{}' already exists",
                        fields.code
                    )));
                }
            }
        }

        repo::update_program(&self.db, user.tenant_id, id, &fields).await?;
        info!(tenant_id = user.tenant_id, program_id = id, "Program updated");
        self.program(user.tenant_id, id).await
    }

    pub async fn delete_program(&self, user: &CurrentUser, id: i64) -> ServiceResult<()> {
        user.require_author()?;
        if !repo::soft_delete(&self.db, "programs", user.tenant_id, id).await? {
            return Err(ServiceError::not_found(format!("Program {} not found", id)));
        }
        info!(tenant_id = user.tenant_id, program_id = id, "Program deleted");
        Ok(())
    }

    async fn program(&self, tenant_id: i64, id: i64) -> ServiceResult<Program> {
        repo::find_program(&self.db, tenant_id, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Program {} not found", id)))
    }

    // ------------------------------------------------------------------
    // Courses
    // ------------------------------------------------------------------

    pub async fn create_course(&self, user: &CurrentUser, input: CourseInput) -> ServiceResult<Course> {
        user.require_author()?;
        self.program(user.tenant_id, input.program_id).await?;
        let fields = CourseFields {
            program_id: input.program_id,
            code: require_text(&input.code, "code")?,
            title: require_text(&input.title, "title")?,
            position: input.position,
        };

        let id = repo::insert_course(&self.db, user.tenant_id, &fields)
            .await
            .map_err(|e| duplicate_code(e, "Course", &fields.code))?;
        info!(tenant_id = user.tenant_id, course_id = id, program_id = fields.program_id, "Course created");
        self.course(user.tenant_id, id).await
    }

    pub async fn get_course(&self, user: &CurrentUser, id: i64) -> ServiceResult<Course> {
        self.course(user.tenant_id, id).await
    }

    pub async fn list_courses(
        &self,
        user: &CurrentUser,
        program_id: Option<i64>,
        page: PageRequest,
    ) -> ServiceResult<Page<Course>> {
        let total = repo::count_courses(&self.db, user.tenant_id, program_id).await?;
        let pagination = calculate_pagination(total, page);
        let items = repo::list_courses(
            &self.db,
            user.tenant_id,
            program_id,
            pagination.page_size,
            pagination.offset,
        )
        .await?;
        Ok(Page::new(items, total, pagination))
    }

    pub async fn update_course(&self, user: &CurrentUser, id: i64, input: CourseInput) -> ServiceResult<Course> {
        user.require_author()?;
        self.course(user.tenant_id, id).await?;
        self.program(user.tenant_id, input.program_id).await?;
        let fields = CourseFields {
            program_id: input.program_id,
            code: require_text(&input.code, "code")?,
            title: require_text(&input.title, "title")?,
            position: input.position,
        };

        repo::update_course(&self.db, user.tenant_id, id, &fields)
            .await
            .map_err(|e| duplicate_code(e, "Course", &fields.code))?;
        self.course(user.tenant_id, id).await
    }

    pub async fn delete_course(&self, user: &CurrentUser, id: i64) -> ServiceResult<()> {
        user.require_author()?;
        if !repo::soft_delete(&self.db, "courses", user.tenant_id, id).await? {
            return Err(ServiceError::not_found(format!("Course {} not found", id)));
        }
        info!(tenant_id = user.tenant_id, course_id = id, "Course deleted");
        Ok(())
    }

    async fn course(&self, tenant_id: i64, id: i64) -> ServiceResult<Course> {
        repo::find_course(&self.db, tenant_id, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Course {} not found", id)))
    }

    // ------------------------------------------------------------------
    // Lessons
    // ------------------------------------------------------------------

    pub async fn create_lesson(&self, user: &CurrentUser, input: LessonInput) -> ServiceResult<Lesson> {
        user.require_author()?;
        self.course(user.tenant_id, input.course_id).await?;
        let fields = lesson_fields(input)?;

        let id = repo::insert_lesson(&self.db, user.tenant_id, &fields)
            .await
            .map_err(|e| duplicate_code(e, "Lesson", &fields.code))?;
        info!(tenant_id = user.tenant_id, lesson_id = id, course_id = fields.course_id, "Lesson created");
        self.lesson(user.tenant_id, id).await
    }

    pub async fn get_lesson(&self, user: &CurrentUser, id: i64) -> ServiceResult<Lesson> {
        self.lesson(user.tenant_id, id).await
    }

    pub async fn list_lessons(
        &self,
        user: &CurrentUser,
        course_id: Option<i64>,
        page: PageRequest,
    ) -> ServiceResult<Page<Lesson>> {
        let total = repo::count_lessons(&self.db, user.tenant_id, course_id).await?;
        let pagination = calculate_pagination(total, page);
        let items = repo::list_lessons(
            &self.db,
            user.tenant_id,
            course_id,
            pagination.page_size,
            pagination.offset,
        )
        .await?;
        Ok(Page::new(items, total, pagination))
    }

    pub async fn update_lesson(&self, user: &CurrentUser, id: i64, input: LessonInput) -> ServiceResult<Lesson> {
        user.require_author()?;
        self.lesson(user.tenant_id, id).await?;
        self.course(user.tenant_id, input.course_id).await?;
        let fields = lesson_fields(input)?;

        repo::update_lesson(&self.db, user.tenant_id, id, &fields)
            .await
            .map_err(|e| duplicate_code(e, "Lesson", &fields.code))?;
        self.lesson(user.tenant_id, id).await
    }

    pub async fn delete_lesson(&self, user: &CurrentUser, id: i64) -> ServiceResult<()> {
        user.require_author()?;
        if !repo::soft_delete(&self.db, "lessons", user.tenant_id, id).await? {
            return Err(ServiceError::not_found(format!("Lesson {} not found", id)));
        }
        info!(tenant_id = user.tenant_id, lesson_id = id, "Lesson deleted");
        Ok(())
    }

    async fn lesson(&self, tenant_id: i64, id: i64) -> ServiceResult<Lesson> {
        repo::find_lesson(&self.db, tenant_id, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Lesson {} not found", id)))
    }
}

fn program_fields(input: ProgramInput) -> ServiceResult<ProgramFields> {
    if input.price_cents < 0 {
        return Err(ServiceError::bad_request("price_cents must not be negative"));
    }
    let currency = input
        .currency
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "USD".to_string());
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ServiceError::bad_request(format!("Invalid currency '{}'", currency)));
    }

    Ok(ProgramFields {
        code: require_text(&input.code, "code")?,
        title: require_text(&input.title, "title")?,
        description: input.description,
        price_cents: input.price_cents,
        currency,
        is_published: input.is_published,
    })
}

fn lesson_fields(input: LessonInput) -> ServiceResult<LessonFields> {
    if input.duration_minutes < 0 {
        return Err(ServiceError::bad_request("duration_minutes must not be negative"));
    }
    Ok(LessonFields {
        course_id: input.course_id,
        code: require_text(&input.code, "code")?,
        title: require_text(&input.title, "title")?,
        content: input.content,
        position: input.position,
        duration_minutes: input.duration_minutes,
    })
}

fn duplicate_code(err: lms_common::Error, entity: &str, code: &str) -> ServiceError {
    if err.is_unique_violation() {
        ServiceError::conflict(format!("{} code '{}' already exists", entity, code))
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::enrollments::EnrollRequest;
    use crate::services::test_support::{fixture, program_input, seed_lesson};
    use lms_common::api::ErrorKind;

    #[tokio::test]
    async fn test_duplicate_program_code_is_conflict() {
        let fx = fixture().await;

        fx.catalog.create_program(&fx.admin, program_input("P1", 0)).await.unwrap();
        let err = fx
            .catalog
            .create_program(&fx.admin, program_input("P1", 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_students_cannot_author() {
        let fx = fixture().await;

        let err = fx
            .catalog
            .create_program(&fx.student, program_input("P1", 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_students_only_see_published_programs() {
        let fx = fixture().await;
        let mut hidden = program_input("HIDDEN", 0);
        hidden.is_published = false;
        let hidden = fx.catalog.create_program(&fx.admin, hidden).await.unwrap();
        fx.catalog.create_program(&fx.admin, program_input("OPEN", 0)).await.unwrap();

        let page = fx
            .catalog
            .list_programs(&fx.student, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].code, "OPEN");

        let err = fx.catalog.get_program(&fx.student, hidden.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_course_needs_existing_program() {
        let fx = fixture().await;

        let err = fx
            .catalog
            .create_course(
                &fx.admin,
                CourseInput {
                    program_id: 999,
                    code: "C1".into(),
                    title: "Course".into(),
                    position: 0,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_negative_price_rejected() {
        let fx = fixture().await;

        let err = fx
            .catalog
            .create_program(&fx.admin, program_input("P1", -5))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_update_program_changes_fields() {
        let fx = fixture().await;
        let program = fx.catalog.create_program(&fx.admin, program_input("P1", 0)).await.unwrap();

        let mut input = program_input("P1-NEW", 1200);
        input.title = "Renamed".into();
        let updated = fx.catalog.update_program(&fx.admin, program.id, input).await.unwrap();

        assert_eq!(updated.code, "P1-NEW");
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.price_cents, 1200);
    }

    #[tokio::test]
    async fn test_rename_onto_taken_code_is_conflict() {
        let fx = fixture().await;
        let first = seed_lesson(&fx, "A", 0).await;
        let second = seed_lesson(&fx, "B", 0).await;
        let program_b = fx.catalog.get_course(&fx.admin, second.course_id).await.unwrap().program_id;

        let err = fx
            .catalog
            .update_program(&fx.admin, program_b, program_input("A", 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);

        let err = fx
            .catalog
            .update_course(
                &fx.admin,
                second.course_id,
                CourseInput {
                    program_id: program_b,
                    code: "A-C1".into(),
                    title: "Basics".into(),
                    position: 1,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);

        let err = fx
            .catalog
            .update_lesson(
                &fx.admin,
                second.id,
                LessonInput {
                    course_id: second.course_id,
                    code: first.code.clone(),
                    title: "Lesson".into(),
                    content: String::new(),
                    position: 1,
                    duration_minutes: 10,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(fx.catalog.get_lesson(&fx.admin, second.id).await.unwrap().code, "B-L1");
    }

    #[tokio::test]
    async fn test_deleted_program_disappears_from_reads() {
        let fx = fixture().await;
        let program = fx.catalog.create_program(&fx.admin, program_input("GONE", 0)).await.unwrap();
        fx.catalog.create_program(&fx.admin, program_input("KEPT", 0)).await.unwrap();

        fx.catalog.delete_program(&fx.admin, program.id).await.unwrap();

        let err = fx.catalog.get_program(&fx.admin, program.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        let page = fx
            .catalog
            .list_programs(&fx.admin, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(page.items.iter().all(|p| p.code != "GONE"));

        let err = fx.catalog.delete_program(&fx.admin, program.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err = fx
            .enrollments
            .enroll(&fx.student, EnrollRequest { program_id: program.id, user_id: None })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_deleted_course_and_lesson_are_not_found() {
        let fx = fixture().await;
        let lesson = seed_lesson(&fx, "P1", 0).await;

        fx.catalog.delete_lesson(&fx.admin, lesson.id).await.unwrap();
        let err = fx.catalog.get_lesson(&fx.admin, lesson.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        let lessons = fx
            .catalog
            .list_lessons(&fx.admin, Some(lesson.course_id), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(lessons.total, 1);

        fx.catalog.delete_course(&fx.admin, lesson.course_id).await.unwrap();
        let err = fx.catalog.get_course(&fx.admin, lesson.course_id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_students_cannot_delete() {
        let fx = fixture().await;
        let program = fx.catalog.create_program(&fx.admin, program_input("P1", 0)).await.unwrap();

        let err = fx.catalog.delete_program(&fx.student, program.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }
}
