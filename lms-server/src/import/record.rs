//! Import records and input parsing
//!
//! A record is an arbitrary field map plus an optional primary key. JSON
//! input is an array of objects; CSV input has a header row and every cell
//! arrives as a string.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct ImportRecord {
    /// Primary key, when the record targets a known row
    pub id: Option<i64>,
    pub fields: Map<String, Value>,
}

impl ImportRecord {
    /// Split `id` out of a field map
    ///
    /// A blank `id` counts as absent; anything else must be an integer.
    pub fn from_fields(mut fields: Map<String, Value>) -> Result<Self, String> {
        let id = match fields.remove("id") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(n.as_i64().ok_or_else(|| format!("invalid id '{}'", n))?),
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(
                s.trim()
                    .parse::<i64>()
                    .map_err(|_| format!("invalid id '{}'", s.trim()))?,
            ),
            Some(other) => return Err(format!("invalid id {}", other)),
        };
        Ok(Self { id, fields })
    }
}

/// A record that could not even be read; reported as a row failure
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRow {
    Record(ImportRecord),
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Json,
    Csv,
}

impl InputFormat {
    /// Pick the format from a Content-Type header value
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.contains("csv") => InputFormat::Csv,
            _ => InputFormat::Json,
        }
    }

    /// Pick the format from a file name
    pub fn from_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => InputFormat::Csv,
            _ => InputFormat::Json,
        }
    }
}

/// Parse a whole payload; malformed documents are an error for the batch
pub fn parse(format: InputFormat, input: &str) -> Result<Vec<ParsedRow>, String> {
    match format {
        InputFormat::Json => parse_json(input),
        InputFormat::Csv => parse_csv(input),
    }
}

pub fn parse_json(input: &str) -> Result<Vec<ParsedRow>, String> {
    let value: Value = serde_json::from_str(input).map_err(|e| format!("Invalid JSON: {}", e))?;
    let Value::Array(items) = value else {
        return Err("JSON input must be an array of objects".to_string());
    };

    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::Object(fields) => match ImportRecord::from_fields(fields) {
                Ok(record) => ParsedRow::Record(record),
                Err(e) => ParsedRow::Invalid(e),
            },
            other => ParsedRow::Invalid(format!("expected an object, got {}", other)),
        })
        .collect())
}

pub fn parse_csv(input: &str) -> Result<Vec<ParsedRow>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| format!("Invalid CSV header: {}", e))?
        .clone();
    if headers.iter().all(|h| h.is_empty()) {
        return Err("CSV input needs a header row".to_string());
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let row = match result {
            Ok(record) => {
                if record.len() != headers.len() {
                    ParsedRow::Invalid(format!(
                        "expected {} columns, found {}",
                        headers.len(),
                        record.len()
                    ))
                } else {
                    let fields: Map<String, Value> = headers
                        .iter()
                        .zip(record.iter())
                        .filter(|(header, _)| !header.is_empty())
                        .map(|(header, cell)| (header.to_string(), Value::String(cell.to_string())))
                        .collect();
                    match ImportRecord::from_fields(fields) {
                        Ok(record) => ParsedRow::Record(record),
                        Err(e) => ParsedRow::Invalid(e),
                    }
                }
            }
            Err(e) => ParsedRow::Invalid(format!("unreadable CSV row: {}", e)),
        };
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(row: &ParsedRow) -> &ImportRecord {
        match row {
            ParsedRow::Record(r) => r,
            ParsedRow::Invalid(e) => panic!("unexpected invalid row: {}", e),
        }
    }

    #[test]
    fn test_json_rows() {
        let rows = parse_json(r#"[{"id": 4, "code": "P1"}, {"code": "P2", "id": ""}, 5]"#).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(record(&rows[0]).id, Some(4));
        assert!(!record(&rows[0]).fields.contains_key("id"));
        assert_eq!(record(&rows[1]).id, None);
        assert!(matches!(rows[2], ParsedRow::Invalid(_)));
    }

    #[test]
    fn test_json_must_be_array() {
        assert!(parse_json(r#"{"code": "P1"}"#).is_err());
        assert!(parse_json("not json").is_err());
    }

    #[test]
    fn test_csv_rows() {
        let rows = parse_csv("id,code,title\n,P1, Intro \n7,P2,Second\n8,P3\n").unwrap();

        assert_eq!(rows.len(), 3);
        let first = record(&rows[0]);
        assert_eq!(first.id, None);
        assert_eq!(first.fields["title"], json!("Intro"));
        assert_eq!(record(&rows[1]).id, Some(7));
        assert!(matches!(rows[2], ParsedRow::Invalid(_)));
    }

    #[test]
    fn test_bad_id_is_row_failure() {
        let rows = parse_csv("id,code\nabc,P1\n").unwrap();
        assert!(matches!(&rows[0], ParsedRow::Invalid(e) if e.contains("abc")));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(InputFormat::from_content_type(Some("text/csv")), InputFormat::Csv);
        assert_eq!(InputFormat::from_content_type(Some("application/json")), InputFormat::Json);
        assert_eq!(InputFormat::from_path(std::path::Path::new("users.CSV")), InputFormat::Csv);
    }
}
