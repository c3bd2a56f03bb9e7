//! Importable entity descriptors
//!
//! A descriptor names the target table, the importable fields and how to
//! convert them, the alternate (natural) key used to match existing rows,
//! and any surrogate foreign keys: import columns holding another entity's
//! natural key that resolve to an id column on this table.

use super::value::SqlValue;
use lms_common::api::is_valid_email;
use lms_common::db::Role;
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Bool,
}

/// One importable column
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Must be present (and non-empty) when inserting
    pub required: bool,
    /// Value used on insert when the record omits the field
    pub default: Option<&'static str>,
    /// Lowercase text values before matching and storing
    pub lowercase: bool,
}

impl FieldSpec {
    const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Text,
            required: true,
            default: None,
            lowercase: false,
        }
    }

    const fn optional(mut self, default: &'static str) -> Self {
        self.required = false;
        self.default = Some(default);
        self
    }

    const fn kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    const fn lowercase(mut self) -> Self {
        self.lowercase = true;
        self
    }
}

/// Import column holding another entity's natural key
#[derive(Debug, Clone, Copy)]
pub struct SurrogateKey {
    /// Field name in the import record, e.g. `program_code`
    pub field: &'static str,
    /// Id column written on this table, e.g. `program_id`
    pub column: &'static str,
    /// Referenced entity
    pub target: &'static str,
    /// Natural key column of the referenced table
    pub target_key: &'static str,
    /// Create the referenced entity when it does not exist yet
    pub create_missing: bool,
    /// Extra columns for created entities; `$key` stands for the key value
    pub create_columns: &'static [(&'static str, &'static str)],
}

/// Row-level business check run after conversion
pub type RowChecker = fn(&BTreeMap<&'static str, SqlValue>) -> Result<(), String>;

#[derive(Debug, Clone, Copy)]
pub struct EntityDescriptor {
    pub name: &'static str,
    pub table: &'static str,
    pub fields: &'static [FieldSpec],
    /// Natural key columns, unique per tenant
    pub alternate_key: &'static [&'static str],
    pub surrogates: &'static [SurrogateKey],
    /// Fixed values written on insert only
    pub insert_constants: &'static [(&'static str, &'static str)],
    pub checker: Option<RowChecker>,
}

impl EntityDescriptor {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn surrogate(&self, field: &str) -> Option<&'static SurrogateKey> {
        self.surrogates.iter().find(|s| s.field == field)
    }

    /// Whether an incoming field name is understood by this entity
    pub fn accepts(&self, name: &str) -> bool {
        name == "id" || self.field(name).is_some() || self.surrogate(name).is_some()
    }
}

const PROGRAM_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("code"),
    FieldSpec::text("title"),
    FieldSpec::text("description").optional(""),
    FieldSpec::text("price_cents").kind(FieldKind::Integer).optional("0"),
    FieldSpec::text("currency").optional("USD"),
    FieldSpec::text("is_published").kind(FieldKind::Bool).optional("false"),
];

const COURSE_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("code"),
    FieldSpec::text("title"),
    FieldSpec::text("position").kind(FieldKind::Integer).optional("0"),
];

const LESSON_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("code"),
    FieldSpec::text("title"),
    FieldSpec::text("content").optional(""),
    FieldSpec::text("position").kind(FieldKind::Integer).optional("0"),
    FieldSpec::text("duration_minutes").kind(FieldKind::Integer).optional("0"),
];

const USER_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("email").lowercase(),
    FieldSpec::text("display_name"),
    FieldSpec::text("role").optional("student").lowercase(),
    FieldSpec::text("locale").optional("en"),
];

const TRANSLATION_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("locale"),
    FieldSpec::text("key"),
    FieldSpec::text("value"),
];

pub static PROGRAMS: EntityDescriptor = EntityDescriptor {
    name: "programs",
    table: "programs",
    fields: PROGRAM_FIELDS,
    alternate_key: &["code"],
    surrogates: &[],
    insert_constants: &[],
    checker: Some(check_program),
};

pub static COURSES: EntityDescriptor = EntityDescriptor {
    name: "courses",
    table: "courses",
    fields: COURSE_FIELDS,
    alternate_key: &["code"],
    surrogates: &[SurrogateKey {
        field: "program_code",
        column: "program_id",
        target: "programs",
        target_key: "code",
        create_missing: true,
        create_columns: &[
            ("title", "$key"),
            ("description", ""),
            ("price_cents", "0"),
            ("currency", "USD"),
            ("is_published", "0"),
        ],
    }],
    insert_constants: &[],
    checker: None,
};

pub static LESSONS: EntityDescriptor = EntityDescriptor {
    name: "lessons",
    table: "lessons",
    fields: LESSON_FIELDS,
    alternate_key: &["code"],
    surrogates: &[SurrogateKey {
        field: "course_code",
        column: "course_id",
        target: "courses",
        target_key: "code",
        create_missing: false,
        create_columns: &[],
    }],
    insert_constants: &[],
    checker: Some(check_lesson),
};

// Imported users get an empty hash, which never verifies
pub static USERS: EntityDescriptor = EntityDescriptor {
    name: "users",
    table: "users",
    fields: USER_FIELDS,
    alternate_key: &["email"],
    surrogates: &[],
    insert_constants: &[("password_hash", ""), ("password_salt", "")],
    checker: Some(check_user),
};

pub static TRANSLATIONS: EntityDescriptor = EntityDescriptor {
    name: "translations",
    table: "translations",
    fields: TRANSLATION_FIELDS,
    alternate_key: &["locale", "key"],
    surrogates: &[],
    insert_constants: &[],
    checker: Some(check_translation),
};

static REGISTRY: &[&EntityDescriptor] = &[&PROGRAMS, &COURSES, &LESSONS, &USERS, &TRANSLATIONS];

/// Look up an importable entity by name
pub fn descriptor(name: &str) -> Option<&'static EntityDescriptor> {
    REGISTRY.iter().copied().find(|d| d.name == name)
}

pub fn entity_names() -> Vec<&'static str> {
    REGISTRY.iter().map(|d| d.name).collect()
}

/// Descriptor owning `table`, for surrogate targets
pub fn descriptor_for_table(table: &str) -> Option<&'static EntityDescriptor> {
    REGISTRY.iter().copied().find(|d| d.table == table)
}

fn check_program(values: &BTreeMap<&'static str, SqlValue>) -> Result<(), String> {
    if let Some(SqlValue::Integer(price)) = values.get("price_cents") {
        if *price < 0 {
            return Err("price_cents must not be negative".to_string());
        }
    }
    if let Some(SqlValue::Text(currency)) = values.get("currency") {
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(format!("invalid currency '{}'", currency));
        }
    }
    Ok(())
}

fn check_lesson(values: &BTreeMap<&'static str, SqlValue>) -> Result<(), String> {
    match values.get("duration_minutes") {
        Some(SqlValue::Integer(minutes)) if *minutes < 0 => {
            Err("duration_minutes must not be negative".to_string())
        }
        _ => Ok(()),
    }
}

fn check_user(values: &BTreeMap<&'static str, SqlValue>) -> Result<(), String> {
    if let Some(SqlValue::Text(email)) = values.get("email") {
        if !is_valid_email(email) {
            return Err(format!("invalid email '{}'", email));
        }
    }
    if let Some(SqlValue::Text(role)) = values.get("role") {
        Role::from_str(role).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn check_translation(values: &BTreeMap<&'static str, SqlValue>) -> Result<(), String> {
    match values.get("locale") {
        Some(SqlValue::Text(locale)) if !crate::services::localization::is_valid_locale(locale) => {
            Err(format!("invalid locale '{}'", locale))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        assert_eq!(descriptor("courses").unwrap().table, "courses");
        assert!(descriptor("payments").is_none());
        assert_eq!(descriptor_for_table("programs").unwrap().name, "programs");
        assert_eq!(entity_names().len(), 5);
    }

    #[test]
    fn test_surrogate_targets_are_registered() {
        for name in entity_names() {
            for surrogate in descriptor(name).unwrap().surrogates {
                let target = descriptor_for_table(surrogate.target).unwrap();
                assert_eq!(target.alternate_key, &[surrogate.target_key]);
            }
        }
    }

    #[test]
    fn test_user_checker() {
        let mut values = BTreeMap::new();
        values.insert("email", SqlValue::Text("nobody".into()));
        assert!(check_user(&values).is_err());

        values.insert("email", SqlValue::Text("a@b.io".into()));
        values.insert("role", SqlValue::Text("owner".into()));
        assert!(check_user(&values).is_err());

        values.insert("role", SqlValue::Text("instructor".into()));
        assert!(check_user(&values).is_ok());
    }
}
