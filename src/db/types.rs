//! Row decoding into JSON records.
//!
//! Decoding is two-phase:
//! 1. [`categorize_type`] classifies a column's backend type name
//! 2. a backend-specific decoder extracts the value for that category
//!
//! A Postgres value whose typed decode fails is read raw: text-format and
//! UTF-8 values come back as strings, anything else is logged and becomes
//! `null`.

use crate::models::{DatabaseType, Record};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value as JsonValue;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Time,
    Interval,
    Network,
    Array,
    Text,
}

/// Categorize a database type name.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if db == DatabaseType::PostgreSQL {
        if lower.ends_with("[]") {
            return TypeCategory::Array;
        }
        // Names that would otherwise match the substring checks below
        match lower.as_str() {
            "interval" => return TypeCategory::Interval,
            "inet" | "cidr" => return TypeCategory::Network,
            "point" => return TypeCategory::Text,
            _ => {}
        }
    }

    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity holds plain floats
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower.contains("blob") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // SQLite stores everything below as text; decode it as such
    if db == DatabaseType::SQLite {
        return TypeCategory::Text;
    }

    match lower.as_str() {
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "timestamptz" => TypeCategory::TimestampTz,
        "timestamp" => TypeCategory::Timestamp,
        "date" => TypeCategory::Date,
        "time" => TypeCategory::Time,
        _ => TypeCategory::Text,
    }
}

/// Binary column values are returned base64-encoded.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Render an interval the way PostgreSQL prints it (`1 year 2 mons 3 days 04:05:06`).
pub fn format_interval(interval: &PgInterval) -> String {
    let mut parts = Vec::new();
    let units = [
        (interval.months / 12, "year"),
        (interval.months % 12, "mon"),
        (interval.days, "day"),
    ];
    for (n, unit) in units {
        if n != 0 {
            let plural = if n == 1 { "" } else { "s" };
            parts.push(format!("{} {}{}", n, unit, plural));
        }
    }

    if interval.microseconds != 0 || parts.is_empty() {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let micros = interval.microseconds.unsigned_abs();
        let secs = micros / 1_000_000;
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        let fraction = micros % 1_000_000;
        if fraction != 0 {
            time.push('.');
            time.push_str(format!("{:06}", fraction).trim_end_matches('0'));
        }
        parts.push(time);
    }

    parts.join(" ")
}

// =============================================================================
// Row to Record Trait
// =============================================================================

/// Trait for converting database rows to JSON records.
pub trait ToRecord {
    fn to_record(&self) -> Record;
}

impl ToRecord for PgRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::PostgreSQL);
                (
                    col.name().to_string(),
                    postgres::decode_column(self, idx, type_name, category),
                )
            })
            .collect()
    }
}

impl ToRecord for SqliteRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = sqlite::column_type_name(self, idx, col.type_info());
                let category = categorize_type(&type_name, DatabaseType::SQLite);
                (
                    col.name().to_string(),
                    sqlite::decode_column(self, idx, &type_name, category),
                )
            })
            .collect()
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use sqlx::postgres::{PgValueFormat, PgValueRef};
    use sqlx::types::BigDecimal;
    use sqlx::types::ipnetwork::IpNetwork;
    use sqlx::{Decode, Postgres, Type, ValueRef};
    use uuid::Uuid;

    /// `Some(value)` when the column decodes as `T`, `None` on a type mismatch.
    type Typed<T> = Option<Option<T>>;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => {
                let value = typed::<i64>(row, idx)
                    .or_else(|| widen(typed::<i32>(row, idx)))
                    .or_else(|| widen(typed::<i16>(row, idx)));
                finish(row, idx, value, |v| JsonValue::Number(v.into()))
            }
            TypeCategory::Boolean => finish(row, idx, typed::<bool>(row, idx), JsonValue::Bool),
            TypeCategory::Float => {
                let value = typed::<f64>(row, idx)
                    .or_else(|| typed::<f32>(row, idx).map(|v| v.map(f64::from)));
                finish(row, idx, value, float_value)
            }
            TypeCategory::Binary => finish(row, idx, typed::<Vec<u8>>(row, idx), |v| {
                encode_binary_value(&v)
            }),
            TypeCategory::Json => finish(row, idx, typed::<JsonValue>(row, idx), |v| v),
            TypeCategory::Uuid => finish(row, idx, typed::<Uuid>(row, idx), render_uuid),
            TypeCategory::TimestampTz => {
                finish(row, idx, typed::<DateTime<Utc>>(row, idx), |v| {
                    JsonValue::String(v.to_rfc3339())
                })
            }
            TypeCategory::Timestamp => {
                finish(row, idx, typed::<NaiveDateTime>(row, idx), render_display)
            }
            TypeCategory::Date => finish(row, idx, typed::<NaiveDate>(row, idx), render_display),
            TypeCategory::Time => finish(row, idx, typed::<NaiveTime>(row, idx), render_display),
            TypeCategory::Interval => finish(row, idx, typed::<PgInterval>(row, idx), |v| {
                JsonValue::String(format_interval(&v))
            }),
            TypeCategory::Network => {
                let is_cidr = type_name.eq_ignore_ascii_case("cidr");
                finish(row, idx, typed::<IpNetwork>(row, idx), |v| {
                    render_network(v, is_cidr)
                })
            }
            TypeCategory::Array => decode_array(row, idx, type_name),
            TypeCategory::Text => finish(row, idx, typed::<String>(row, idx), JsonValue::String),
        }
    }

    fn typed<'r, T>(row: &'r PgRow, idx: usize) -> Typed<T>
    where
        T: Decode<'r, Postgres> + Type<Postgres>,
    {
        row.try_get::<Option<T>, _>(idx).ok()
    }

    fn widen<T: Into<i64>>(value: Typed<T>) -> Typed<i64> {
        value.map(|v| v.map(Into::into))
    }

    fn finish<T>(
        row: &PgRow,
        idx: usize,
        value: Typed<T>,
        render: impl FnOnce(T) -> JsonValue,
    ) -> JsonValue {
        match value {
            Some(Some(v)) => render(v),
            Some(None) => JsonValue::Null,
            None => decode_raw(row, idx),
        }
    }

    fn render_display<T: std::fmt::Display>(value: T) -> JsonValue {
        JsonValue::String(value.to_string())
    }

    fn render_uuid(value: Uuid) -> JsonValue {
        JsonValue::String(value.hyphenated().to_string())
    }

    fn render_decimal(value: BigDecimal) -> JsonValue {
        JsonValue::String(value.to_plain_string())
    }

    /// `inet` host addresses print without their prefix, like the server does.
    fn render_network(value: IpNetwork, is_cidr: bool) -> JsonValue {
        let host_prefix = if value.is_ipv4() { 32 } else { 128 };
        if !is_cidr && value.prefix() == host_prefix {
            JsonValue::String(value.ip().to_string())
        } else {
            JsonValue::String(value.to_string())
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match typed::<BigDecimal>(row, idx) {
            Some(value) => value.map(render_decimal).unwrap_or(JsonValue::Null),
            None => special_numeric(row, idx).unwrap_or_else(|| decode_raw(row, idx)),
        }
    }

    /// NaN and ±Infinity, which no decimal type represents.
    ///
    /// The binary NUMERIC header keeps the kind in its sign word (bytes 4-5).
    fn special_numeric(row: &PgRow, idx: usize) -> Option<JsonValue> {
        let value = row.try_get_raw(idx).ok()?;
        if value.format() != PgValueFormat::Binary {
            return None;
        }
        let special = match value.as_bytes().ok()?.get(4..6)? {
            [0xC0, 0x00] => "NaN",
            [0xD0, 0x00] => "Infinity",
            [0xF0, 0x00] => "-Infinity",
            _ => return None,
        };
        Some(JsonValue::String(special.to_string()))
    }

    fn decode_array(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
        let element = categorize_type(type_name.trim_end_matches("[]"), DatabaseType::PostgreSQL);
        let value = match element {
            TypeCategory::Integer => array_of::<i64>(row, idx, JsonValue::from)
                .or_else(|| array_of::<i32>(row, idx, JsonValue::from))
                .or_else(|| array_of::<i16>(row, idx, JsonValue::from)),
            TypeCategory::Float => array_of::<f64>(row, idx, float_value)
                .or_else(|| array_of::<f32>(row, idx, |v| float_value(f64::from(v)))),
            TypeCategory::Decimal => array_of::<BigDecimal>(row, idx, render_decimal),
            TypeCategory::Boolean => array_of::<bool>(row, idx, JsonValue::Bool),
            TypeCategory::Json => array_of::<JsonValue>(row, idx, |v| v),
            TypeCategory::Uuid => array_of::<Uuid>(row, idx, render_uuid),
            TypeCategory::TimestampTz => array_of::<DateTime<Utc>>(row, idx, |v| {
                JsonValue::String(v.to_rfc3339())
            }),
            TypeCategory::Timestamp => array_of::<NaiveDateTime>(row, idx, render_display),
            TypeCategory::Date => array_of::<NaiveDate>(row, idx, render_display),
            TypeCategory::Time => array_of::<NaiveTime>(row, idx, render_display),
            TypeCategory::Interval => array_of::<PgInterval>(row, idx, |v| {
                JsonValue::String(format_interval(&v))
            }),
            TypeCategory::Network => array_of::<IpNetwork>(row, idx, |v| render_network(v, false)),
            TypeCategory::Binary | TypeCategory::Array => None,
            TypeCategory::Text => array_of::<String>(row, idx, JsonValue::String),
        };
        match value {
            Some(v) => v,
            None => decode_raw(row, idx),
        }
    }

    /// Decode a one-dimensional array, rendering each element.
    fn array_of<'r, T>(row: &'r PgRow, idx: usize, render: fn(T) -> JsonValue) -> Option<JsonValue>
    where
        Vec<Option<T>>: Decode<'r, Postgres> + Type<Postgres>,
    {
        let items = row.try_get::<Option<Vec<Option<T>>>, _>(idx).ok()?;
        Some(match items {
            Some(items) => JsonValue::Array(
                items
                    .into_iter()
                    .map(|item| item.map(render).unwrap_or(JsonValue::Null))
                    .collect(),
            ),
            None => JsonValue::Null,
        })
    }

    /// Last resort for values no typed decoder accepts.
    fn decode_raw(row: &PgRow, idx: usize) -> JsonValue {
        let value = match row.try_get_raw(idx) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(column = idx, error = %e, "Failed to read column value");
                return JsonValue::Null;
            }
        };
        if value.is_null() {
            return JsonValue::Null;
        }

        match raw_text(&value) {
            Some(text) => JsonValue::String(text),
            None => {
                tracing::error!(
                    column = idx,
                    type_name = %value.type_info().name(),
                    "Failed to decode column value"
                );
                JsonValue::Null
            }
        }
    }

    /// Text-format values as sent; binary values only when they are
    /// printable UTF-8 (enums, domains over text, citext).
    fn raw_text(value: &PgValueRef<'_>) -> Option<String> {
        match value.format() {
            PgValueFormat::Text => value.as_str().ok().map(str::to_string),
            PgValueFormat::Binary => {
                let text = std::str::from_utf8(value.as_bytes().ok()?).ok()?;
                let printable = text.chars().all(|c| !c.is_control() || c.is_whitespace());
                printable.then(|| text.to_string())
            }
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::ValueRef;
    use sqlx::sqlite::SqliteTypeInfo;

    /// Declared column type, or the stored value's type for expression
    /// columns that have none.
    pub fn column_type_name(row: &SqliteRow, idx: usize, declared: &SqliteTypeInfo) -> String {
        if !declared.is_null() {
            return declared.name().to_string();
        }
        row.try_get_raw(idx)
            .map(|value| value.type_info().name().to_string())
            .unwrap_or_else(|_| declared.name().to_string())
    }

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            _ => decode_text(row, idx, type_name),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_boolean(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(float_value)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_binary(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| encode_binary_value(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_text(row: &SqliteRow, idx: usize, type_name: &str) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            if type_name.to_lowercase().contains("json") {
                if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
                    return json;
                }
            }
            return JsonValue::String(v);
        }
        JsonValue::Null
    }
}
