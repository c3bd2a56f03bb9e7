//! Bulk import and reconciliation
//!
//! A batch flows through four stages inside one transaction:
//!
//! 1. [`collector`]: convert records, gather identifiers per table/property
//! 2. [`resolver`]: fetch the existing rows those identifiers name
//! 3. [`merge`]: decide insert / update / skip / fail per record
//! 4. [`writer`]: create missing referenced rows, then write the records
//!
//! Row-level problems are counted and reported; a store error aborts and
//! rolls back the whole batch. One batch per tenant and entity runs at a
//! time, serialized by a named lock.

pub mod collector;
pub mod merge;
pub mod record;
pub mod resolver;
pub mod schema;
pub mod value;
pub mod writer;

pub use record::{parse, InputFormat, ParsedRow};

use crate::db::import_runs::{self, NewImportRun};
use crate::pagination::{calculate_pagination, Page, PageRequest};
use crate::services::{CurrentUser, LockService, ServiceError, ServiceResult};
use crate::utils::retry_on_lock;
use chrono::Utc;
use lms_common::db::init::get_setting_i64;
use lms_common::db::ImportRun;
use lms_common::events::{EventBus, LmsEvent};
use merge::Decision;
use schema::EntityDescriptor;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{error, info, warn};

/// Extra lock lifetime granted per record in a batch
const LOCK_MS_PER_RECORD: u64 = 50;

/// Lock lifetime for a batch; grows with the number of records so a large
/// batch never outlives the lock that serializes it
fn import_lock_ttl(base: Duration, records: usize) -> Duration {
    base.saturating_add(Duration::from_millis(LOCK_MS_PER_RECORD.saturating_mul(records as u64)))
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ImportOptions {
    /// Run the whole pipeline, then roll back
    #[serde(default)]
    pub dry_run: bool,
}

/// Counters and per-row messages for one batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportReport {
    pub run_id: i64,
    pub entity: String,
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub messages: Vec<String>,
    pub dry_run: bool,
}

#[derive(Clone)]
pub struct ImportService {
    db: SqlitePool,
    events: EventBus,
    locks: LockService,
    /// Batch size limit from the config file; wins over the database setting
    max_batch_size: Option<usize>,
}

impl ImportService {
    pub fn new(db: SqlitePool, events: EventBus, locks: LockService, max_batch_size: Option<usize>) -> Self {
        Self {
            db,
            events,
            locks,
            max_batch_size,
        }
    }

    /// Parse a JSON or CSV payload and import it
    pub async fn import_payload(
        &self,
        user: &CurrentUser,
        entity: &str,
        format: InputFormat,
        payload: &str,
        options: ImportOptions,
    ) -> ServiceResult<ImportReport> {
        user.require_admin()?;
        let rows = parse(format, payload).map_err(ServiceError::bad_request)?;
        self.import(user, entity, rows, options).await
    }

    /// Import already parsed rows on behalf of an admin
    pub async fn import(
        &self,
        user: &CurrentUser,
        entity: &str,
        rows: Vec<ParsedRow>,
        options: ImportOptions,
    ) -> ServiceResult<ImportReport> {
        user.require_admin()?;
        self.import_for_tenant(user.tenant_id, Some(user.user_id), entity, rows, options)
            .await
    }

    /// Import rows into a tenant; also used by the command line
    pub async fn import_for_tenant(
        &self,
        tenant_id: i64,
        user_id: Option<i64>,
        entity: &str,
        rows: Vec<ParsedRow>,
        options: ImportOptions,
    ) -> ServiceResult<ImportReport> {
        let descriptor = schema::descriptor(entity).ok_or_else(|| {
            ServiceError::bad_request(format!(
                "Unknown import entity '{}'; expected one of: {}",
                entity,
                schema::entity_names().join(", ")
            ))
        })?;

        let limit = self.batch_limit().await?;
        if rows.len() > limit {
            return Err(ServiceError::bad_request(format!(
                "Batch of {} records exceeds the limit of {}",
                rows.len(),
                limit
            )));
        }

        let lock_name = format!("import:{}:{}", tenant_id, descriptor.name);
        let ttl = import_lock_ttl(self.locks.default_ttl().await?, rows.len());
        self.locks
            .with_lock(&lock_name, ttl, || self.run_batch(tenant_id, user_id, descriptor, rows, options))
            .await
    }

    pub async fn list_runs(&self, user: &CurrentUser, page: PageRequest) -> ServiceResult<Page<ImportRun>> {
        user.require_admin()?;
        let total = import_runs::count_runs(&self.db, user.tenant_id).await?;
        let pagination = calculate_pagination(total, page);
        let runs = import_runs::list_runs(&self.db, user.tenant_id, pagination.page_size, pagination.offset).await?;
        Ok(Page::new(runs, total, pagination))
    }

    async fn batch_limit(&self) -> ServiceResult<usize> {
        if let Some(limit) = self.max_batch_size {
            return Ok(limit);
        }
        let limit = get_setting_i64(&self.db, "import_max_batch_size", 5000).await?;
        Ok(limit.max(0) as usize)
    }

    async fn run_batch(
        &self,
        tenant_id: i64,
        user_id: Option<i64>,
        descriptor: &'static EntityDescriptor,
        rows: Vec<ParsedRow>,
        options: ImportOptions,
    ) -> ServiceResult<ImportReport> {
        let started_at = Utc::now();
        let record_count = rows.len();
        let collected = collector::collect(descriptor, rows);

        let mut tx = self.db.begin().await?;
        let lookup = resolver::resolve(&mut *tx, tenant_id, &collected.identifiers).await?;
        let plans = merge::plan(descriptor, collected.records, &lookup);

        let outcome = match writer::write(&mut *tx, tenant_id, descriptor, &plans).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(tenant_id, entity = descriptor.name, error = %e, "Import batch aborted");
                return Err(ServiceError::internal(format!("Import aborted, nothing was written: {}", e)));
            }
        };

        if options.dry_run {
            tx.rollback().await?;
        } else {
            tx.commit().await?;
        }

        let mut messages = Vec::new();
        let (mut skipped, mut failed) = (0, 0);
        for plan in &plans {
            match &plan.decision {
                Decision::Skip(reason) => {
                    skipped += 1;
                    messages.push(format!("row {}: skipped: {}", plan.record.row, reason));
                }
                Decision::Fail(reason) => {
                    failed += 1;
                    messages.push(format!("row {}: failed: {}", plan.record.row, reason));
                }
                Decision::Insert | Decision::Update { .. } => {}
            }
        }
        for created in &outcome.created_references {
            messages.push(format!("created {}", created));
        }
        for field in &collected.ignored_fields {
            messages.push(format!("ignored unknown field '{}'", field));
        }

        let finished_at = Utc::now();
        let run = NewImportRun {
            tenant_id,
            user_id,
            entity: descriptor.name,
            added: outcome.added,
            updated: outcome.updated,
            skipped,
            failed,
            messages: &messages,
            dry_run: options.dry_run,
            started_at,
            finished_at,
        };
        let max_wait = get_setting_i64(&self.db, "database_max_lock_wait_ms", 5000).await?;
        let run_id = retry_on_lock("record_import_run", max_wait.max(0) as u64, || {
            import_runs::insert_run(&self.db, &run)
        })
        .await?;

        if failed > 0 {
            warn!(tenant_id, entity = descriptor.name, failed, "Import finished with row failures");
        }
        info!(
            tenant_id,
            run_id,
            entity = descriptor.name,
            records = record_count,
            added = outcome.added,
            updated = outcome.updated,
            skipped,
            failed,
            dry_run = options.dry_run,
            "Import batch finished"
        );

        self.events.emit_lossy(LmsEvent::ImportCompleted {
            tenant_id,
            run_id,
            entity: descriptor.name.to_string(),
            added: outcome.added,
            updated: outcome.updated,
            skipped,
            failed,
            dry_run: options.dry_run,
            timestamp: finished_at,
        });

        Ok(ImportReport {
            run_id,
            entity: descriptor.name.to_string(),
            added: outcome.added,
            updated: outcome.updated,
            skipped,
            failed,
            messages,
            dry_run: options.dry_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{catalog, identity, translations};
    use crate::services::test_support::{fixture, Fixture};
    use lms_common::api::ErrorKind;

    async fn import_json(fx: &Fixture, entity: &str, json: &str, dry_run: bool) -> ServiceResult<ImportReport> {
        fx.imports
            .import_payload(&fx.admin, entity, InputFormat::Json, json, ImportOptions { dry_run })
            .await
    }

    #[tokio::test]
    async fn test_duplicate_key_in_batch_is_skipped_and_reported() {
        let fx = fixture().await;

        let report = import_json(
            &fx,
            "programs",
            r#"[
                {"code": "DUP", "title": "First"},
                {"code": "DUP", "title": "Second"},
                {"code": "OTHER", "title": "Other"}
            ]"#,
            false,
        )
        .await
        .unwrap();

        assert_eq!((report.added, report.updated, report.skipped, report.failed), (2, 0, 1, 0));
        assert!(report.messages.iter().any(|m| m.contains("row 2") && m.contains("code=DUP")));

        let program = catalog::find_program_by_code(&fx.db, fx.tenant_id, "DUP").await.unwrap().unwrap();
        assert_eq!(program.title, "First");
    }

    #[tokio::test]
    async fn test_second_import_updates_by_natural_key() {
        let fx = fixture().await;
        import_json(&fx, "programs", r#"[{"code": "P1", "title": "Old", "price_cents": 500}]"#, false)
            .await
            .unwrap();

        let report = import_json(&fx, "programs", r#"[{"code": "P1", "title": "New"}]"#, false)
            .await
            .unwrap();
        assert_eq!((report.added, report.updated), (0, 1));

        let program = catalog::find_program_by_code(&fx.db, fx.tenant_id, "P1").await.unwrap().unwrap();
        assert_eq!(program.title, "New");
        assert_eq!(program.price_cents, 500);
    }

    #[tokio::test]
    async fn test_primary_key_update_renames_code() {
        let fx = fixture().await;
        import_json(&fx, "programs", r#"[{"code": "P1", "title": "One"}]"#, false)
            .await
            .unwrap();
        let id = catalog::find_program_by_code(&fx.db, fx.tenant_id, "P1").await.unwrap().unwrap().id;

        let payload = format!(r#"[{{"id": {}, "code": "P1-RENAMED"}}, {{"id": 4242, "code": "X"}}]"#, id);
        let report = import_json(&fx, "programs", &payload, false).await.unwrap();

        assert_eq!((report.updated, report.failed), (1, 1));
        assert!(report.messages.iter().any(|m| m.contains("unknown primary key 4242")));
        assert!(catalog::find_program_by_code(&fx.db, fx.tenant_id, "P1-RENAMED").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_courses_create_missing_programs_once() {
        let fx = fixture().await;

        let report = import_json(
            &fx,
            "courses",
            r#"[
                {"code": "C1", "title": "One", "program_code": "AUTO"},
                {"code": "C2", "title": "Two", "program_code": "AUTO"}
            ]"#,
            false,
        )
        .await
        .unwrap();

        assert_eq!(report.added, 2);
        assert_eq!(report.messages.iter().filter(|m| m.contains("created programs code=AUTO")).count(), 1);

        let program = catalog::find_program_by_code(&fx.db, fx.tenant_id, "AUTO").await.unwrap().unwrap();
        assert_eq!(program.title, "AUTO");
        assert!(!program.is_published);
        assert_eq!(catalog::count_courses(&fx.db, fx.tenant_id, Some(program.id)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lessons_with_unknown_course_fail() {
        let fx = fixture().await;

        let report = import_json(
            &fx,
            "lessons",
            r#"[{"code": "L1", "title": "Intro", "course_code": "MISSING"}]"#,
            false,
        )
        .await
        .unwrap();

        assert_eq!((report.added, report.failed), (0, 1));
        assert!(report.messages[0].contains("unresolved reference course_code 'MISSING'"));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing_but_is_recorded() {
        let fx = fixture().await;

        let report = import_json(&fx, "programs", r#"[{"code": "DRY", "title": "Dry"}]"#, true)
            .await
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.added, 1);

        assert!(catalog::find_program_by_code(&fx.db, fx.tenant_id, "DRY").await.unwrap().is_none());

        let runs = fx.imports.list_runs(&fx.admin, PageRequest::default()).await.unwrap();
        assert_eq!(runs.total, 1);
        assert!(runs.items[0].dry_run);
    }

    #[tokio::test]
    async fn test_store_error_rolls_back_whole_batch() {
        let fx = fixture().await;
        sqlx::query(
            "CREATE TRIGGER reject_boom BEFORE INSERT ON programs WHEN NEW.code = 'BOOM' BEGIN SELECT RAISE(ABORT, 'boom'); END",
        )
        .execute(&fx.db)
        .await
        .unwrap();

        let err = import_json(
            &fx,
            "programs",
            r#"[{"code": "GOOD", "title": "Good"}, {"code": "BOOM", "title": "Boom"}]"#,
            false,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(catalog::find_program_by_code(&fx.db, fx.tenant_id, "GOOD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_csv_users_and_translations() {
        let fx = fixture().await;

        let report = fx
            .imports
            .import_payload(
                &fx.admin,
                "users",
                InputFormat::Csv,
                "email,display_name,role\nNew@Example.com,New Person,instructor\nbad,Bad,student\n",
                ImportOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!((report.added, report.failed), (1, 1));

        let user = identity::find_user_by_email(&fx.db, fx.tenant_id, "new@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.password_hash, "");

        let report = import_json(
            &fx,
            "translations",
            r#"[{"locale": "de", "key": "greeting", "value": "Hallo", "note": "x"}]"#,
            false,
        )
        .await
        .unwrap();
        assert_eq!(report.added, 1);
        assert!(report.messages.iter().any(|m| m.contains("ignored unknown field 'note'")));
        assert_eq!(
            translations::find_value(&fx.db, fx.tenant_id, "de", "greeting").await.unwrap().as_deref(),
            Some("Hallo")
        );
    }

    #[test]
    fn test_lock_ttl_grows_with_batch_size() {
        let base = Duration::from_secs(30);
        assert_eq!(import_lock_ttl(base, 0), base);
        assert_eq!(import_lock_ttl(base, 1000), base + Duration::from_secs(50));
        assert!(import_lock_ttl(base, 10_000) > import_lock_ttl(base, 1000));
    }

    #[tokio::test]
    async fn test_batch_limit_and_permissions() {
        let fx = fixture().await;
        let limited = ImportService::new(fx.db.clone(), fx.events.clone(), LockService::new(fx.db.clone()), Some(1));

        let err = limited
            .import_payload(
                &fx.admin,
                "programs",
                InputFormat::Json,
                r#"[{"code": "A", "title": "A"}, {"code": "B", "title": "B"}]"#,
                ImportOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let err = import_json(&fx, "payments", "[]", false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let err = fx
            .imports
            .import_payload(&fx.student, "programs", InputFormat::Json, "[]", ImportOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }
}
