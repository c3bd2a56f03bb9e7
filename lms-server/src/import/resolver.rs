//! Existing-row resolver
//!
//! Turns the collected identifier map into a lookup table of existing rows
//! with one query per (table, property) chunk, inside the batch
//! transaction. Soft-deleted rows are included and flagged so that an
//! import can restore them instead of colliding with their natural key.

use super::collector::{IdentifierMap, NaturalKey, PRIMARY_KEY};
use lms_common::Result;
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;
use tracing::debug;

/// Bound parameters per lookup query, well below SQLite's variable limit
const LOOKUP_CHUNK: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingRow {
    pub id: i64,
    pub is_deleted: bool,
}

/// `(table, property) -> value -> existing row`
#[derive(Debug, Default)]
pub struct LookupTable {
    rows: HashMap<(&'static str, String), HashMap<String, ExistingRow>>,
}

impl LookupTable {
    pub fn get(&self, table: &'static str, property: &str, value: &str) -> Option<ExistingRow> {
        self.rows
            .get(&(table, property.to_string()))
            .and_then(|values| values.get(value))
            .copied()
    }

    pub fn insert(&mut self, table: &'static str, property: &str, value: String, row: ExistingRow) {
        self.rows
            .entry((table, property.to_string()))
            .or_default()
            .insert(value, row);
    }

    pub fn len(&self) -> usize {
        self.rows.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fetch every row the batch refers to
pub async fn resolve(
    conn: &mut SqliteConnection,
    tenant_id: i64,
    identifiers: &IdentifierMap,
) -> Result<LookupTable> {
    let mut lookup = LookupTable::default();

    for (&table, properties) in identifiers {
        for (property, values) in properties {
            let values: Vec<&String> = values.iter().collect();
            for chunk in values.chunks(LOOKUP_CHUNK) {
                if property == PRIMARY_KEY {
                    resolve_ids(&mut *conn, tenant_id, table, chunk, &mut lookup).await?;
                } else {
                    resolve_keys(&mut *conn, tenant_id, table, property, chunk, &mut lookup).await?;
                }
            }
        }
    }

    debug!(tenant_id, rows = lookup.len(), "Resolved existing import rows");
    Ok(lookup)
}

async fn resolve_ids(
    conn: &mut SqliteConnection,
    tenant_id: i64,
    table: &'static str,
    values: &[&String],
    lookup: &mut LookupTable,
) -> Result<()> {
    let ids: Vec<i64> = values.iter().filter_map(|v| v.parse().ok()).collect();
    if ids.is_empty() {
        return Ok(());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT id, is_deleted FROM {} WHERE tenant_id = ? AND id IN ({})",
        table, placeholders
    );

    let mut query = sqlx::query(&sql).bind(tenant_id);
    for id in &ids {
        query = query.bind(*id);
    }

    for row in query.fetch_all(&mut *conn).await? {
        let id: i64 = row.try_get(0)?;
        let is_deleted: bool = row.try_get(1)?;
        lookup.insert(table, PRIMARY_KEY, id.to_string(), ExistingRow { id, is_deleted });
    }
    Ok(())
}

async fn resolve_keys(
    conn: &mut SqliteConnection,
    tenant_id: i64,
    table: &'static str,
    property: &str,
    values: &[&String],
    lookup: &mut LookupTable,
) -> Result<()> {
    let columns: Vec<&str> = property.split('+').collect();

    let key_columns = columns
        .iter()
        .map(|c| format!("CAST({} AS TEXT)", c))
        .collect::<Vec<_>>()
        .join(", ");
    let one_key = columns
        .iter()
        .map(|c| format!("{} = ?", c))
        .collect::<Vec<_>>()
        .join(" AND ");
    let conditions = vec![format!("({})", one_key); values.len()].join(" OR ");
    let sql = format!(
        "SELECT id, is_deleted, {} FROM {} WHERE tenant_id = ? AND ({})",
        key_columns, table, conditions
    );

    let mut query = sqlx::query(&sql).bind(tenant_id);
    for value in values {
        for part in NaturalKey::decode(value) {
            query = query.bind(part);
        }
    }

    for row in query.fetch_all(&mut *conn).await? {
        let id: i64 = row.try_get(0)?;
        let is_deleted: bool = row.try_get(1)?;
        let mut parts = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            parts.push(row.try_get::<String, _>(index + 2)?);
        }
        let key = NaturalKey {
            columns: &[],
            values: parts,
        };
        lookup.insert(table, property, key.encoded(), ExistingRow { id, is_deleted });
    }
    Ok(())
}
