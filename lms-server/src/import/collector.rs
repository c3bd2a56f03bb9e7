//! Identifier collector
//!
//! Converts raw records into typed values and gathers, per table and key
//! property, the distinct identifiers the batch mentions: primary keys and
//! natural keys of the target entity, and the natural keys of every entity
//! referenced through a surrogate foreign key.

use super::record::{ImportRecord, ParsedRow};
use super::schema::{EntityDescriptor, SurrogateKey};
use super::value::{convert, is_blank, SqlValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Property name under which primary keys are collected
pub const PRIMARY_KEY: &str = "id";

const KEY_SEPARATOR: char = '\u{1f}';

/// Natural key value of one record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub columns: &'static [&'static str],
    pub values: Vec<String>,
}

impl NaturalKey {
    /// Single string used as a lookup key
    pub fn encoded(&self) -> String {
        self.values.join(&KEY_SEPARATOR.to_string())
    }

    /// Property name for a key made of `columns`
    pub fn property(columns: &[&str]) -> String {
        columns.join("+")
    }

    pub fn decode(encoded: &str) -> Vec<String> {
        encoded.split(KEY_SEPARATOR).map(String::from).collect()
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(c, v)| format!("{}={}", c, v))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

/// A surrogate foreign key value carried by a record
#[derive(Debug, Clone)]
pub struct Reference {
    pub surrogate: &'static SurrogateKey,
    pub value: String,
}

/// One record after conversion
#[derive(Debug, Clone)]
pub struct PreparedRecord {
    /// 1-based position in the batch
    pub row: usize,
    pub id: Option<i64>,
    /// Fields present in the record, converted
    pub values: BTreeMap<&'static str, SqlValue>,
    pub natural_key: Option<NaturalKey>,
    pub references: Vec<Reference>,
    /// Set when the record cannot be imported at all
    pub problem: Option<String>,
}

/// `{table -> property -> distinct values}`
pub type IdentifierMap = BTreeMap<&'static str, BTreeMap<String, BTreeSet<String>>>;

#[derive(Debug, Default)]
pub struct Collected {
    pub records: Vec<PreparedRecord>,
    pub identifiers: IdentifierMap,
    /// Incoming field names the entity does not know
    pub ignored_fields: BTreeSet<String>,
}

pub fn collect(descriptor: &'static EntityDescriptor, rows: Vec<ParsedRow>) -> Collected {
    let mut collected = Collected::default();

    for (index, row) in rows.into_iter().enumerate() {
        let record = match row {
            ParsedRow::Record(record) => prepare(descriptor, index + 1, record, &mut collected.ignored_fields),
            ParsedRow::Invalid(problem) => PreparedRecord {
                row: index + 1,
                id: None,
                values: BTreeMap::new(),
                natural_key: None,
                references: Vec::new(),
                problem: Some(problem),
            },
        };

        if record.problem.is_none() {
            note_identifiers(descriptor, &record, &mut collected.identifiers);
        }
        collected.records.push(record);
    }

    collected
}

fn prepare(
    descriptor: &'static EntityDescriptor,
    row: usize,
    record: ImportRecord,
    ignored: &mut BTreeSet<String>,
) -> PreparedRecord {
    let mut prepared = PreparedRecord {
        row,
        id: record.id,
        values: BTreeMap::new(),
        natural_key: None,
        references: Vec::new(),
        problem: None,
    };

    for (name, raw) in &record.fields {
        if let Some(spec) = descriptor.field(name) {
            if is_blank(raw) {
                continue;
            }
            match convert(spec, raw) {
                Ok(value) => {
                    prepared.values.insert(spec.name, value);
                }
                Err(e) => {
                    prepared.problem = Some(e);
                    return prepared;
                }
            }
        } else if let Some(surrogate) = descriptor.surrogate(name) {
            if is_blank(raw) {
                continue;
            }
            let value = match raw {
                serde_json::Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            };
            prepared.references.push(Reference { surrogate, value });
        } else if !descriptor.accepts(name) {
            ignored.insert(name.clone());
        }
    }

    if let Some(checker) = descriptor.checker {
        if let Err(e) = checker(&prepared.values) {
            prepared.problem = Some(e);
            return prepared;
        }
    }

    let key_values: Option<Vec<String>> = descriptor
        .alternate_key
        .iter()
        .map(|column| prepared.values.get(column).map(SqlValue::key_text))
        .collect();
    prepared.natural_key = key_values.map(|values| NaturalKey {
        columns: descriptor.alternate_key,
        values,
    });

    prepared
}

fn note_identifiers(descriptor: &EntityDescriptor, record: &PreparedRecord, map: &mut IdentifierMap) {
    if let Some(id) = record.id {
        map.entry(descriptor.table)
            .or_default()
            .entry(PRIMARY_KEY.to_string())
            .or_default()
            .insert(id.to_string());
    }

    if let Some(key) = &record.natural_key {
        map.entry(descriptor.table)
            .or_default()
            .entry(NaturalKey::property(key.columns))
            .or_default()
            .insert(key.encoded());
    }

    for reference in &record.references {
        map.entry(reference.surrogate.target)
            .or_default()
            .entry(reference.surrogate.target_key.to_string())
            .or_default()
            .insert(reference.value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::record::parse_json;
    use crate::import::schema::{COURSES, TRANSLATIONS, USERS};

    #[test]
    fn test_collects_keys_ids_and_references() {
        let rows = parse_json(
            r#"[
                {"code": "C1", "title": "One", "program_code": "P1"},
                {"id": 9, "code": "C2", "title": "Two", "program_code": "P1"},
                {"code": "C3", "title": "Three", "program_code": "P2", "colour": "red"}
            ]"#,
        )
        .unwrap();

        let collected = collect(&COURSES, rows);

        let courses = &collected.identifiers["courses"];
        assert_eq!(courses["code"].len(), 3);
        assert!(courses["id"].contains("9"));
        let programs = &collected.identifiers["programs"];
        assert_eq!(programs["code"], BTreeSet::from(["P1".to_string(), "P2".to_string()]));
        assert!(collected.ignored_fields.contains("colour"));
    }

    #[test]
    fn test_composite_key() {
        let rows = parse_json(r#"[{"locale": "de", "key": "hello", "value": "Hallo"}]"#).unwrap();
        let collected = collect(&TRANSLATIONS, rows);

        let key = collected.records[0].natural_key.clone().unwrap();
        assert_eq!(key.to_string(), "locale=de, key=hello");
        assert_eq!(NaturalKey::decode(&key.encoded()), vec!["de", "hello"]);
        assert!(collected.identifiers["translations"].contains_key("locale+key"));
    }

    #[test]
    fn test_conversion_and_checker_problems() {
        let rows = parse_json(
            r#"[
                {"email": "Ada@Example.com", "display_name": "Ada"},
                {"email": "not-an-email", "display_name": "Bob"}
            ]"#,
        )
        .unwrap();
        let collected = collect(&USERS, rows);

        let ada = &collected.records[0];
        assert!(ada.problem.is_none());
        assert_eq!(ada.natural_key.as_ref().unwrap().values, vec!["ada@example.com"]);

        let bob = &collected.records[1];
        assert!(bob.problem.as_deref().unwrap().contains("invalid email"));
        assert_eq!(collected.identifiers["users"]["email"].len(), 1);
    }
}
