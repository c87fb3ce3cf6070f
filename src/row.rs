//! Row shapes and PostgreSQL value decoding.
//!
//! Value conversion uses a two-phase approach: [`TypeCategory`] classifies
//! column types into logical categories, and the decoder extracts a
//! `serde_json::Value` per category. The row shape (positional array versus
//! keyed object) is a tagged variant selected by the resolved `object_rows`
//! option, never inferred from the call site.

use crate::config::{NamingConvention, ResolvedOptions};
use crate::cursor::Cursor;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Row as SqlxRow, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for PostgreSQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Unknown,
}

/// Classify a PostgreSQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    match type_name.to_uppercase().as_str() {
        "INT2" | "INT4" | "INT8" | "OID" => TypeCategory::Integer,
        "FLOAT4" | "FLOAT8" => TypeCategory::Float,
        "NUMERIC" => TypeCategory::Decimal,
        "BOOL" => TypeCategory::Boolean,
        "JSON" | "JSONB" => TypeCategory::Json,
        "UUID" => TypeCategory::Uuid,
        "TIMESTAMP" => TypeCategory::Timestamp,
        "TIMESTAMPTZ" => TypeCategory::TimestampTz,
        "DATE" => TypeCategory::Date,
        "TIME" => TypeCategory::Time,
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Decimal Support
// =============================================================================

/// Wrapper for raw NUMERIC values as strings, preserving the exact
/// database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        // Prepared statements deliver NUMERIC in binary form; the simple
        // protocol delivers it as text.
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => Ok(RawDecimal(numeric_text(value.as_bytes()?)?)),
        }
    }
}

/// Render the binary NUMERIC wire form as its exact decimal text: a header
/// of four big-endian i16s (ndigits, weight, sign, dscale) followed by
/// base-10000 digit groups.
fn numeric_text(bytes: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    fn group(bytes: &[u8], at: usize) -> Result<i16, sqlx::error::BoxDynError> {
        let pair: [u8; 2] = bytes
            .get(at..at + 2)
            .and_then(|b| b.try_into().ok())
            .ok_or("truncated NUMERIC value")?;
        Ok(i16::from_be_bytes(pair))
    }

    let ndigits = group(bytes, 0)? as usize;
    let weight = group(bytes, 2)? as i32;
    let sign = group(bytes, 4)? as u16;
    let dscale = group(bytes, 6)? as usize;

    match sign {
        0x0000 | 0x4000 => {}
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => return Err("invalid NUMERIC sign".into()),
    }

    // Groups past ndigits are implicit zeros.
    let digit = |i: i32| -> Result<u16, sqlx::error::BoxDynError> {
        if i < 0 || i as usize >= ndigits {
            Ok(0)
        } else {
            group(bytes, 8 + 2 * i as usize).map(|d| d as u16)
        }
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            let d = digit(i)?;
            if i == 0 {
                out.push_str(&d.to_string());
            } else {
                out.push_str(&format!("{:04}", d));
            }
        }
    }

    if dscale > 0 {
        out.push('.');
        let mut frac = String::new();
        let mut i = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit(i)?));
            i += 1;
        }
        frac.truncate(dscale);
        out.push_str(&frac);
    }

    Ok(out)
}

// =============================================================================
// Row Shapes
// =============================================================================

/// One fetched row, shaped per the resolved `object_rows` option.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    /// Positional array of values.
    Values(Vec<JsonValue>),
    /// Keyed by column name, after the naming convention is applied.
    Object(serde_json::Map<String, JsonValue>),
}

impl Row {
    /// Look up a value by column name. Returns None for positional rows.
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        match self {
            Row::Values(_) => None,
            Row::Object(map) => map.get(name),
        }
    }

    /// Look up a value by position. Returns None for keyed rows.
    pub fn at(&self, index: usize) -> Option<&JsonValue> {
        match self {
            Row::Values(values) => values.get(index),
            Row::Object(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Row::Values(values) => values.len(),
            Row::Object(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert into a plain JSON value (array or object).
    pub fn into_json(self) -> JsonValue {
        match self {
            Row::Values(values) => JsonValue::Array(values),
            Row::Object(map) => JsonValue::Object(map),
        }
    }
}

/// Result of one executed statement.
///
/// `rows` is present for a materialized fetch, `cursor` for a streaming
/// fetch, `rows_affected` for mutating statements. The lifetime is that of
/// the cursor's source: `'static` for pool-created results, the borrow of
/// the session for connection-created streaming results.
#[derive(Debug, Default)]
pub struct QueryResult<'c> {
    /// Column names in result order, naming convention applied. Empty when
    /// the statement produced no row description.
    pub fields: Vec<String>,
    pub rows: Option<Vec<Row>>,
    pub rows_affected: Option<u64>,
    pub cursor: Option<Cursor<'c>>,
}

impl QueryResult<'_> {
    /// Number of rows affected, defaulting to 0.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected.unwrap_or(0)
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Column names of a row, with the naming convention applied.
pub(crate) fn field_names(row: &PgRow, naming: NamingConvention) -> Vec<String> {
    row.columns()
        .iter()
        .map(|col| naming.apply(col.name()))
        .collect()
}

/// Decode one native row into the requested shape.
pub(crate) fn decode_pg_row(row: &PgRow, options: &ResolvedOptions) -> Row {
    if options.object_rows {
        let map = row
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                let value = decode_column(row, idx, category);
                (options.naming.apply(col.name()), value)
            })
            .collect();
        Row::Object(map)
    } else {
        let values = row
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                decode_column(row, idx, category)
            })
            .collect();
        Row::Values(values)
    }
}

fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Json => decode_json(row, idx),
        TypeCategory::Uuid => decode_uuid(row, idx),
        TypeCategory::Timestamp => decode_as_string::<chrono::NaiveDateTime>(row, idx),
        TypeCategory::TimestampTz => decode_as_string::<chrono::DateTime<chrono::Utc>>(row, idx),
        TypeCategory::Date => decode_as_string::<chrono::NaiveDate>(row, idx),
        TypeCategory::Time => decode_as_string::<chrono::NaiveTime>(row, idx),
        TypeCategory::Unknown => decode_text(row, idx),
    }
}

fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
    if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
        return JsonValue::Null;
    }
    if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    // OID is its own wire type; none of the signed widths accept it.
    if let Ok(Some(v)) = row.try_get::<Option<sqlx::postgres::types::Oid>, _>(idx) {
        return JsonValue::Number(v.0.into());
    }
    JsonValue::Null
}

fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
        return serde_json::Number::from_f64(v as f64)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    JsonValue::Null
}

fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
    match row.try_get::<Option<RawDecimal>, _>(idx) {
        // Always the exact database representation; a float round-trip
        // silently rounds values past 15-16 significant digits.
        Ok(Some(v)) => JsonValue::String(v.0),
        Ok(None) => JsonValue::Null,
        Err(e) => {
            tracing::error!(error = ?e, "Failed to decode NUMERIC");
            JsonValue::Null
        }
    }
}

fn decode_boolean(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<bool>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn decode_json(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<JsonValue>, _>(idx)
        .ok()
        .flatten()
        .unwrap_or(JsonValue::Null)
}

fn decode_uuid(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<uuid::Uuid>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::String(v.to_string()))
        .unwrap_or(JsonValue::Null)
}

fn decode_as_string<'r, T>(row: &'r PgRow, idx: usize) -> JsonValue
where
    T: Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres> + ToString,
{
    row.try_get::<Option<T>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::String(v.to_string()))
        .unwrap_or(JsonValue::Null)
}

fn decode_text(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}
