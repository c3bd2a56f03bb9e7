//! Batch writer
//!
//! Applies a merge plan inside the open batch transaction: first creates
//! referenced rows that do not exist yet, then inserts and updates the
//! batch records. Any store error is returned as is so the caller rolls the
//! whole transaction back.

use super::merge::{Decision, LinkTarget, PlannedRecord};
use super::schema::{descriptor_for_table, EntityDescriptor, SurrogateKey};
use super::value::{convert_default, SqlValue};
use chrono::Utc;
use lms_common::{Error, Result};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub added: usize,
    pub updated: usize,
    /// Referenced rows created on the fly, e.g. `programs code=P9`
    pub created_references: Vec<String>,
}

pub async fn write(
    conn: &mut SqliteConnection,
    tenant_id: i64,
    descriptor: &'static EntityDescriptor,
    plans: &[PlannedRecord],
) -> Result<WriteOutcome> {
    let mut outcome = WriteOutcome::default();
    let created = create_references(&mut *conn, tenant_id, plans, &mut outcome).await?;

    for plan in plans {
        let mut columns: Vec<(&'static str, SqlValue)> = plan
            .record
            .values
            .iter()
            .map(|(name, value)| (*name, value.clone()))
            .collect();

        for link in &plan.links {
            let id = match &link.target {
                LinkTarget::Existing(id) => *id,
                LinkTarget::Create(key) => created
                    .get(&(link.surrogate.target, key.clone()))
                    .copied()
                    .ok_or_else(|| Error::Internal(format!("{} '{}' was not created", link.surrogate.target, key)))?,
            };
            columns.push((link.surrogate.column, SqlValue::Integer(id)));
        }

        match &plan.decision {
            Decision::Insert => {
                for field in descriptor.fields {
                    if columns.iter().any(|(name, _)| *name == field.name) {
                        continue;
                    }
                    if let Some(default) = field.default {
                        let value = convert_default(field, default).map_err(Error::Internal)?;
                        columns.push((field.name, value));
                    }
                }
                for (name, value) in descriptor.insert_constants {
                    columns.push((*name, SqlValue::Text(value.to_string())));
                }
                insert_row(&mut *conn, tenant_id, descriptor.table, columns).await?;
                outcome.added += 1;
            }
            Decision::Update { id, restore } => {
                update_row(&mut *conn, tenant_id, descriptor.table, *id, columns).await?;
                if *restore {
                    debug!(table = descriptor.table, id, "Restored soft-deleted row");
                }
                outcome.updated += 1;
            }
            Decision::Skip(_) | Decision::Fail(_) => {}
        }
    }

    Ok(outcome)
}

async fn create_references(
    conn: &mut SqliteConnection,
    tenant_id: i64,
    plans: &[PlannedRecord],
    outcome: &mut WriteOutcome,
) -> Result<HashMap<(&'static str, String), i64>> {
    let mut created = HashMap::new();

    for plan in plans.iter().filter(|p| p.decision.is_accepted()) {
        for link in &plan.links {
            let LinkTarget::Create(key) = &link.target else {
                continue;
            };
            let cache_key = (link.surrogate.target, key.clone());
            if created.contains_key(&cache_key) {
                continue;
            }

            let columns = reference_columns(link.surrogate, key)?;
            let id = insert_row(&mut *conn, tenant_id, link.surrogate.target, columns).await?;
            outcome
                .created_references
                .push(format!("{} {}={}", link.surrogate.target, link.surrogate.target_key, key));
            created.insert(cache_key, id);
        }
    }

    Ok(created)
}

fn reference_columns(surrogate: &SurrogateKey, key: &str) -> Result<Vec<(&'static str, SqlValue)>> {
    let target = descriptor_for_table(surrogate.target)
        .ok_or_else(|| Error::Internal(format!("no import descriptor for table {}", surrogate.target)))?;

    let mut columns = vec![(surrogate.target_key, SqlValue::Text(key.to_string()))];
    for (name, template) in surrogate.create_columns {
        let raw = if *template == "$key" { key } else { *template };
        let value = match target.field(name) {
            Some(spec) => convert_default(spec, raw).map_err(Error::Internal)?,
            None => SqlValue::Text(raw.to_string()),
        };
        columns.push((*name, value));
    }
    Ok(columns)
}

async fn insert_row(
    conn: &mut SqliteConnection,
    tenant_id: i64,
    table: &str,
    columns: Vec<(&'static str, SqlValue)>,
) -> Result<i64> {
    let now = Utc::now();
    let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
    let sql = format!(
        "INSERT INTO {} (tenant_id, {}, created_at, updated_at) VALUES (?, {}, ?, ?)",
        table,
        names.join(", "),
        vec!["?"; names.len()].join(", ")
    );

    let mut query = sqlx::query(&sql).bind(tenant_id);
    for (_, value) in columns {
        query = value.bind_to(query);
    }
    let id = query
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
    Ok(id)
}

async fn update_row(
    conn: &mut SqliteConnection,
    tenant_id: i64,
    table: &str,
    id: i64,
    columns: Vec<(&'static str, SqlValue)>,
) -> Result<()> {
    let assignments: String = columns
        .iter()
        .map(|(name, _)| format!("{} = ?, ", name))
        .collect();
    let sql = format!(
        "UPDATE {} SET {}updated_at = ?, is_deleted = 0, deleted_at = NULL WHERE id = ? AND tenant_id = ?",
        table, assignments
    );

    let mut query = sqlx::query(&sql);
    for (_, value) in columns {
        query = value.bind_to(query);
    }
    query
        .bind(Utc::now())
        .bind(id)
        .bind(tenant_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
