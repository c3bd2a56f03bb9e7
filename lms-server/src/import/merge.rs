//! Merge planner
//!
//! Decides, record by record and in batch order, whether a record updates
//! an existing row, inserts a new one, is skipped as a duplicate of an
//! earlier record, or fails. Matching order:
//!
//! 1. An explicit primary key wins; it must exist for this tenant and must
//!    not contradict the record's natural key.
//! 2. Otherwise the natural key matches an existing row (soft-deleted rows
//!    included; the update restores them) or the record is an insert.
//!
//! A primary key or natural key is claimed by the first accepted record;
//! later records carrying the same identifier are skipped.

use super::collector::{NaturalKey, PreparedRecord, PRIMARY_KEY};
use super::resolver::LookupTable;
use super::schema::{EntityDescriptor, SurrogateKey};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Insert,
    Update { id: i64, restore: bool },
    Skip(String),
    Fail(String),
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Insert | Decision::Update { .. })
    }
}

/// Where a surrogate foreign key points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Existing(i64),
    /// Referenced row to be created from its natural key
    Create(String),
}

#[derive(Debug, Clone)]
pub struct Link {
    pub surrogate: &'static SurrogateKey,
    pub target: LinkTarget,
}

#[derive(Debug, Clone)]
pub struct PlannedRecord {
    pub record: PreparedRecord,
    pub decision: Decision,
    pub links: Vec<Link>,
}

pub fn plan(
    descriptor: &'static EntityDescriptor,
    records: Vec<PreparedRecord>,
    lookup: &LookupTable,
) -> Vec<PlannedRecord> {
    let mut claimed_ids: HashMap<i64, usize> = HashMap::new();
    let mut claimed_keys: HashMap<String, usize> = HashMap::new();
    let mut planned = Vec::with_capacity(records.len());

    for record in records {
        let (decision, links) = match decide(descriptor, &record, lookup, &claimed_ids, &claimed_keys) {
            Ok(accepted) => accepted,
            Err(rejected) => (rejected, Vec::new()),
        };

        if decision.is_accepted() {
            if let Some(id) = record.id {
                claimed_ids.insert(id, record.row);
            }
            if let Decision::Update { id, .. } = decision {
                claimed_ids.entry(id).or_insert(record.row);
            }
            if let Some(key) = &record.natural_key {
                claimed_keys.insert(key.encoded(), record.row);
            }
        }

        planned.push(PlannedRecord {
            record,
            decision,
            links,
        });
    }

    planned
}

fn decide(
    descriptor: &'static EntityDescriptor,
    record: &PreparedRecord,
    lookup: &LookupTable,
    claimed_ids: &HashMap<i64, usize>,
    claimed_keys: &HashMap<String, usize>,
) -> Result<(Decision, Vec<Link>), Decision> {
    if let Some(problem) = &record.problem {
        return Err(Decision::Fail(problem.clone()));
    }

    if let Some(id) = record.id {
        if let Some(first) = claimed_ids.get(&id) {
            return Err(Decision::Skip(format!("duplicate id {} (first seen in row {})", id, first)));
        }
    }
    if let Some(key) = &record.natural_key {
        if let Some(first) = claimed_keys.get(&key.encoded()) {
            return Err(Decision::Skip(format!("duplicate key {} (first seen in row {})", key, first)));
        }
    }

    let decision = match (record.id, &record.natural_key) {
        (Some(id), key) => match_primary_key(descriptor, id, key.as_ref(), lookup, claimed_ids)?,
        (None, Some(key)) => match lookup.get(descriptor.table, &NaturalKey::property(key.columns), &key.encoded()) {
            Some(existing) => {
                if let Some(first) = claimed_ids.get(&existing.id) {
                    return Err(Decision::Skip(format!(
                        "duplicate of record {} (first seen in row {})",
                        existing.id, first
                    )));
                }
                Decision::Update {
                    id: existing.id,
                    restore: existing.is_deleted,
                }
            }
            None => Decision::Insert,
        },
        (None, None) => {
            return Err(Decision::Fail(format!(
                "missing key field {}",
                descriptor.alternate_key.join(", ")
            )))
        }
    };

    if decision == Decision::Insert {
        check_required(descriptor, record)?;
    }

    let links = link_references(record, lookup)?;
    Ok((decision, links))
}

fn match_primary_key(
    descriptor: &EntityDescriptor,
    id: i64,
    key: Option<&NaturalKey>,
    lookup: &LookupTable,
    claimed_ids: &HashMap<i64, usize>,
) -> Result<Decision, Decision> {
    let Some(existing) = lookup.get(descriptor.table, PRIMARY_KEY, &id.to_string()) else {
        return Err(Decision::Fail(format!("unknown primary key {}", id)));
    };

    if let Some(key) = key {
        if let Some(other) = lookup.get(descriptor.table, &NaturalKey::property(key.columns), &key.encoded()) {
            if other.id != id {
                return Err(Decision::Fail(format!(
                    "key {} belongs to record {}, not {}",
                    key, other.id, id
                )));
            }
        }
    }

    if let Some(first) = claimed_ids.get(&id) {
        return Err(Decision::Skip(format!("duplicate id {} (first seen in row {})", id, first)));
    }

    Ok(Decision::Update {
        id: existing.id,
        restore: existing.is_deleted,
    })
}

fn check_required(descriptor: &EntityDescriptor, record: &PreparedRecord) -> Result<(), Decision> {
    for field in descriptor.fields {
        if field.required && !record.values.contains_key(field.name) {
            return Err(Decision::Fail(format!("missing required field '{}'", field.name)));
        }
    }
    for surrogate in descriptor.surrogates {
        if !record.references.iter().any(|r| r.surrogate.field == surrogate.field) {
            return Err(Decision::Fail(format!("missing required field '{}'", surrogate.field)));
        }
    }
    Ok(())
}

fn link_references(record: &PreparedRecord, lookup: &LookupTable) -> Result<Vec<Link>, Decision> {
    let mut links = Vec::with_capacity(record.references.len());

    for reference in &record.references {
        let surrogate = reference.surrogate;
        let target = match lookup.get(surrogate.target, surrogate.target_key, &reference.value) {
            Some(row) if row.is_deleted => {
                return Err(Decision::Fail(format!(
                    "{} '{}' refers to a deleted record",
                    surrogate.field, reference.value
                )))
            }
            Some(row) => LinkTarget::Existing(row.id),
            None if surrogate.create_missing => LinkTarget::Create(reference.value.clone()),
            None => {
                return Err(Decision::Fail(format!(
                    "unresolved reference {} '{}'",
                    surrogate.field, reference.value
                )))
            }
        };
        links.push(Link { surrogate, target });
    }

    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::collector::collect;
    use crate::import::record::parse_json;
    use crate::import::resolver::ExistingRow;
    use crate::import::schema::{COURSES, LESSONS, PROGRAMS};

    fn planned(descriptor: &'static EntityDescriptor, json: &str, lookup: &LookupTable) -> Vec<Decision> {
        let collected = collect(descriptor, parse_json(json).unwrap());
        plan(descriptor, collected.records, lookup)
            .into_iter()
            .map(|p| p.decision)
            .collect()
    }

    fn existing(id: i64) -> ExistingRow {
        ExistingRow { id, is_deleted: false }
    }

    #[test]
    fn test_duplicate_natural_key_is_skipped_with_identifier() {
        let decisions = planned(
            &PROGRAMS,
            r#"[{"code": "P1", "title": "A"}, {"code": "P1", "title": "B"}]"#,
            &LookupTable::default(),
        );

        assert_eq!(decisions[0], Decision::Insert);
        match &decisions[1] {
            Decision::Skip(message) => {
                assert!(message.contains("code=P1"));
                assert!(message.contains("row 1"));
            }
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[test]
    fn test_primary_key_takes_precedence() {
        let mut lookup = LookupTable::default();
        lookup.insert("programs", "id", "5".into(), existing(5));
        lookup.insert("programs", "code", "P1".into(), existing(5));
        lookup.insert("programs", "code", "P2".into(), existing(6));

        let decisions = planned(
            &PROGRAMS,
            r#"[
                {"id": 5, "code": "P1", "title": "Renamed"},
                {"id": 5, "code": "P2"},
                {"id": 99, "title": "Ghost"}
            ]"#,
            &lookup,
        );

        assert_eq!(decisions[0], Decision::Update { id: 5, restore: false });
        assert!(matches!(&decisions[1], Decision::Skip(m) if m.contains("duplicate id 5")));
        assert!(matches!(&decisions[2], Decision::Fail(m) if m.contains("unknown primary key 99")));
    }

    #[test]
    fn test_primary_key_contradicting_natural_key_fails() {
        let mut lookup = LookupTable::default();
        lookup.insert("programs", "id", "5".into(), existing(5));
        lookup.insert("programs", "code", "P2".into(), existing(6));

        let decisions = planned(&PROGRAMS, r#"[{"id": 5, "code": "P2"}]"#, &lookup);
        assert!(matches!(&decisions[0], Decision::Fail(m) if m.contains("belongs to record 6")));
    }

    #[test]
    fn test_soft_deleted_match_is_restored() {
        let mut lookup = LookupTable::default();
        lookup.insert("programs", "code", "OLD".into(), ExistingRow { id: 3, is_deleted: true });

        let decisions = planned(&PROGRAMS, r#"[{"code": "OLD"}]"#, &lookup);
        assert_eq!(decisions[0], Decision::Update { id: 3, restore: true });
    }

    #[test]
    fn test_insert_requires_fields_but_update_does_not() {
        let mut lookup = LookupTable::default();
        lookup.insert("programs", "code", "P1".into(), existing(1));

        let decisions = planned(&PROGRAMS, r#"[{"code": "P1"}, {"code": "P2"}]"#, &lookup);
        assert_eq!(decisions[0], Decision::Update { id: 1, restore: false });
        assert!(matches!(&decisions[1], Decision::Fail(m) if m.contains("'title'")));
    }

    #[test]
    fn test_references_link_create_or_fail() {
        let mut lookup = LookupTable::default();
        lookup.insert("programs", "code", "P1".into(), existing(1));

        let collected = collect(
            &COURSES,
            parse_json(
                r#"[
                    {"code": "C1", "title": "One", "program_code": "P1"},
                    {"code": "C2", "title": "Two", "program_code": "NEW"},
                    {"code": "C3", "title": "Three"}
                ]"#,
            )
            .unwrap(),
        );
        let plans = plan(&COURSES, collected.records, &lookup);

        assert_eq!(plans[0].links[0].target, LinkTarget::Existing(1));
        assert_eq!(plans[1].links[0].target, LinkTarget::Create("NEW".into()));
        assert!(matches!(&plans[2].decision, Decision::Fail(m) if m.contains("program_code")));

        let decisions = planned(
            &LESSONS,
            r#"[{"code": "L1", "title": "One", "course_code": "NOPE"}]"#,
            &LookupTable::default(),
        );
        assert!(matches!(&decisions[0], Decision::Fail(m) if m.contains("unresolved reference course_code 'NOPE'")));
    }

    #[test]
    fn test_failed_record_does_not_claim_key() {
        let decisions = planned(
            &PROGRAMS,
            r#"[{"code": "P1", "price_cents": -1, "title": "A"}, {"code": "P1", "title": "B"}]"#,
            &LookupTable::default(),
        );

        assert!(matches!(&decisions[0], Decision::Fail(_)));
        assert_eq!(decisions[1], Decision::Insert);
    }
}
