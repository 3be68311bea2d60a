// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dialect-neutral row and parameter types.
//!
//! Both backends hand rows back as named JSON maps so callers can read
//! `row["total_sales"]` without caring which driver produced it. Columns are
//! decoded by trying `i64`, then `f64`, then `String`; anything else becomes
//! `null`.
//!
//! Primary rows also carry DECIMAL, DATE and DATETIME columns. DECIMAL
//! becomes a JSON number (or its exact text if it does not fit an `f64`),
//! dates become `YYYY-MM-DD` strings.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Number, Value};
use sqlx::mysql::MySqlRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

/// One result row, keyed by column name.
pub type RowMap = Map<String, Value>;

/// A positional query parameter, bound as `?` in both dialects.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// Decode every column of `row` into a JSON map.
pub(crate) fn decode_row<'r, R>(row: &'r R) -> RowMap
where
    R: Row,
    usize: ColumnIndex<R>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
    f64: Decode<'r, R::Database> + Type<R::Database>,
    String: Decode<'r, R::Database> + Type<R::Database>,
{
    let mut map = Map::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            v.map_or(Value::Null, Value::from)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            v.and_then(Number::from_f64).map_or(Value::Null, Value::Number)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            v.map_or(Value::Null, Value::String)
        } else {
            tracing::debug!(column = column.name(), "Column type not representable, returning null");
            Value::Null
        };
        map.insert(column.name().to_string(), value);
    }
    map
}

/// Decode a primary row. Values arrive over the text protocol, so any column
/// whose type is not recognised is kept as its text.
pub(crate) fn decode_mysql_row(row: &MySqlRow) -> RowMap {
    let mut map = Map::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_mysql_column(row, idx, column.type_info().name());
        map.insert(column.name().to_string(), value);
    }
    map
}

fn decode_mysql_column(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
    let typed = match type_name {
        "DECIMAL" => row
            .try_get_unchecked::<Option<String>, _>(idx)
            .ok()
            .map(|v| v.map_or(Value::Null, decimal_value)),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .ok()
            .map(|v| v.map_or(Value::Null, |d| Value::String(d.to_string()))),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .ok()
            .map(|v| v.map_or(Value::Null, |d| Value::String(d.format("%Y-%m-%d %H:%M:%S").to_string()))),
        _ => None,
    };
    if let Some(value) = typed {
        return value;
    }

    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        v.map_or(Value::Null, Value::from)
    } else if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        v.map_or(Value::Null, Value::from)
    } else if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        v.and_then(Number::from_f64).map_or(Value::Null, Value::Number)
    } else if let Ok(v) = row.try_get_unchecked::<Option<String>, _>(idx) {
        v.map_or(Value::Null, Value::String)
    } else {
        tracing::debug!(column = idx, type_name, "Column type not representable, returning null");
        Value::Null
    }
}

/// `"1234.50"` → `1234.5`; text that does not parse stays text.
fn decimal_value(text: String) -> Value {
    match text.trim().parse::<f64>().ok().and_then(Number::from_f64) {
        Some(n) => Value::Number(n),
        None => Value::String(text),
    }
}

/// Read a column as `f64`, returning `default` for NULL, missing or
/// non-numeric values. Numeric strings are parsed.
#[must_use]
pub fn value_as_f64(value: Option<&Value>, default: f64) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        _ => default,
    }
}

/// Read a column as `i64`, returning `default` for NULL, missing or
/// non-numeric values. Floats are truncated.
#[must_use]
pub fn value_as_i64(value: Option<&Value>, default: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(default),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(default)
        }
        Some(Value::Bool(b)) => i64::from(*b),
        _ => default,
    }
}
