//! Typed column values and conversion from raw import values

use super::schema::{FieldKind, FieldSpec};
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::query::Query;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Bool(bool),
    Null,
}

impl SqlValue {
    /// Canonical text form used for key matching
    pub fn key_text(&self) -> String {
        match self {
            SqlValue::Text(s) => s.clone(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Null => String::new(),
        }
    }

    pub fn bind_to<'q>(
        self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            SqlValue::Text(s) => query.bind(s),
            SqlValue::Integer(i) => query.bind(i),
            SqlValue::Bool(b) => query.bind(b),
            SqlValue::Null => query.bind(None::<String>),
        }
    }
}

/// True for JSON null and blank strings
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Convert a raw value for `spec`; CSV cells arrive as strings
pub fn convert(spec: &FieldSpec, value: &Value) -> Result<SqlValue, String> {
    match spec.kind {
        FieldKind::Text => {
            let text = match value {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => return Err(format!("{}: expected text, got {}", spec.name, other)),
            };
            Ok(SqlValue::Text(if spec.lowercase {
                text.to_lowercase()
            } else {
                text
            }))
        }
        FieldKind::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .map(SqlValue::Integer)
                .ok_or_else(|| format!("{}: '{}' is not an integer", spec.name, n)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(SqlValue::Integer)
                .map_err(|_| format!("{}: '{}' is not an integer", spec.name, s.trim())),
            other => Err(format!("{}: expected integer, got {}", spec.name, other)),
        },
        FieldKind::Bool => match value {
            Value::Bool(b) => Ok(SqlValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(SqlValue::Bool(false)),
                Some(1) => Ok(SqlValue::Bool(true)),
                _ => Err(format!("{}: '{}' is not a boolean", spec.name, n)),
            },
            Value::String(s) => parse_bool(s)
                .map(SqlValue::Bool)
                .ok_or_else(|| format!("{}: '{}' is not a boolean", spec.name, s.trim())),
            other => Err(format!("{}: expected boolean, got {}", spec.name, other)),
        },
    }
}

/// Convert a field's declared default
pub fn convert_default(spec: &FieldSpec, default: &str) -> Result<SqlValue, String> {
    convert(spec, &Value::String(default.to_string()))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}
