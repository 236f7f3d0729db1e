//! Conversion between JSON values and backend-native parameter and result
//! types.
//!
//! The adapters speak [`serde_json::Value`] at their surface; this module
//! owns the mapping onto engine parameters ([`SqlParam`]), placeholder-style
//! rewriting for engines that number their parameters, large-integer
//! normalization for result rows, and the storage-text codec used by the
//! key-value tables.

use serde_json::{Map, Value};

use crate::error::{StorageError, StorageResult};

/// Values larger than this are not exactly representable in an IEEE double
/// and are therefore normalized to strings in result rows.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Maximum accepted storage-text payload, in bytes.
pub const MAX_STORAGE_BYTES: usize = 1_048_576;

/// A positional SQL parameter in engine-neutral form.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl SqlParam {
    /// Map a JSON value to its natural parameter type. Arrays and objects
    /// bind as their JSON text.
    pub fn from_value(value: &Value) -> SqlParam {
        match value {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlParam::Integer(i)
                } else {
                    SqlParam::Real(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => SqlParam::Text(s.clone()),
            other => SqlParam::Text(other.to_string()),
        }
    }
}

/// Bind a slice of JSON values positionally.
pub fn bind_params(values: &[Value]) -> Vec<SqlParam> {
    values.iter().map(SqlParam::from_value).collect()
}

#[cfg(feature = "relational")]
impl rusqlite::ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value as SqliteValue};
        Ok(match self {
            SqlParam::Null => ToSqlOutput::Owned(SqliteValue::Null),
            SqlParam::Integer(i) => ToSqlOutput::Owned(SqliteValue::Integer(*i)),
            SqlParam::Real(r) => ToSqlOutput::Owned(SqliteValue::Real(*r)),
            SqlParam::Text(s) => ToSqlOutput::Owned(SqliteValue::Text(s.clone())),
            SqlParam::Bool(b) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*b))),
        })
    }
}

#[cfg(feature = "columnar")]
impl duckdb::ToSql for SqlParam {
    fn to_sql(&self) -> duckdb::Result<duckdb::types::ToSqlOutput<'_>> {
        use duckdb::types::{ToSqlOutput, Value as DuckValue};
        Ok(match self {
            SqlParam::Null => ToSqlOutput::Owned(DuckValue::Null),
            SqlParam::Integer(i) => ToSqlOutput::Owned(DuckValue::BigInt(*i)),
            SqlParam::Real(r) => ToSqlOutput::Owned(DuckValue::Double(*r)),
            SqlParam::Text(s) => ToSqlOutput::Owned(DuckValue::Text(s.clone())),
            SqlParam::Bool(b) => ToSqlOutput::Owned(DuckValue::Boolean(*b)),
        })
    }
}

/// Rewrite `?` placeholders to numbered `$1, $2, …` form, leaving question
/// marks inside single-quoted literals untouched.
pub fn convert_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = 0usize;
    let mut in_literal = false;
    for c in sql.chars() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            '?' if !in_literal => {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

fn normalize_value(value: &mut Value) {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i.abs() > MAX_SAFE_INTEGER {
                    *value = Value::String(i.to_string());
                }
            } else if let Some(u) = n.as_u64() {
                if u > MAX_SAFE_INTEGER as u64 {
                    *value = Value::String(u.to_string());
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_value),
        Value::Object(map) => map.values_mut().for_each(normalize_value),
        _ => {}
    }
}

/// Replace integers outside the double-safe window with their decimal
/// string form, recursively, across a set of result rows.
pub fn normalize_large_integers(rows: &mut [Map<String, Value>]) {
    for row in rows {
        row.values_mut().for_each(normalize_value);
    }
}

/// Encode a value for a text storage column: strings pass through, every
/// other shape stores as JSON text.
pub fn to_storage_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decode a text storage column: JSON-shaped text parses back into its
/// value, anything else is a plain string.
pub fn from_storage_text(text: &str) -> Value {
    let trimmed = text.trim_start();
    let looks_like_json = matches!(
        trimmed.as_bytes().first(),
        Some(b'{' | b'[' | b'"' | b'-' | b'0'..=b'9')
    ) || matches!(trimmed, "true" | "false" | "null");
    if looks_like_json {
        if let Ok(value) = serde_json::from_str(text) {
            return value;
        }
    }
    Value::String(text.to_owned())
}

/// Reject oversize storage payloads before they reach the engine.
pub fn validate_storage_text(text: &str) -> StorageResult<()> {
    if text.len() > MAX_STORAGE_BYTES {
        return Err(StorageError::invalid_value(format!(
            "value of {} bytes exceeds the {MAX_STORAGE_BYTES}-byte storage cap",
            text.len()
        )));
    }
    Ok(())
}
