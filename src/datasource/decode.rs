//! Row decoding into JSON
//!
//! Each column is decoded by the type its database reports for it:
//! - integers, floats and booleans become JSON numbers and booleans,
//! - decimals become strings so no precision is lost,
//! - dates and times become ISO 8601 strings,
//! - JSON columns are embedded as JSON.
//!
//! Anything unrecognized is read as text, then as raw bytes, so one exotic
//! column never fails a whole query.

use crate::datasource::dialect::Dialect;
use crate::runtime::result::Payload;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::types::{Decimal, Json, Uuid};
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};

/// How a column is read, derived from its database type name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Bool,
    SmallInt,
    Int,
    BigInt,
    Unsigned,
    Real,
    Double,
    Decimal,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Json,
    Uuid,
    Bytes,
    Text,
}

impl ColumnKind {
    pub(crate) fn of(dialect: Dialect, type_name: &str) -> Self {
        let name = type_name.trim().to_ascii_uppercase();
        match dialect {
            Dialect::Postgres => match name.as_str() {
                "BOOL" => ColumnKind::Bool,
                "INT2" => ColumnKind::SmallInt,
                "INT4" => ColumnKind::Int,
                "INT8" => ColumnKind::BigInt,
                "FLOAT4" => ColumnKind::Real,
                "FLOAT8" => ColumnKind::Double,
                "NUMERIC" => ColumnKind::Decimal,
                "TIMESTAMP" => ColumnKind::Timestamp,
                "TIMESTAMPTZ" => ColumnKind::TimestampTz,
                "DATE" => ColumnKind::Date,
                "TIME" => ColumnKind::Time,
                "JSON" | "JSONB" => ColumnKind::Json,
                "UUID" => ColumnKind::Uuid,
                "BYTEA" => ColumnKind::Bytes,
                _ => ColumnKind::Text,
            },
            Dialect::Sqlite => match name.as_str() {
                "BOOLEAN" => ColumnKind::Bool,
                "INTEGER" => ColumnKind::BigInt,
                "REAL" => ColumnKind::Double,
                "BLOB" => ColumnKind::Bytes,
                _ => ColumnKind::Text,
            },
            // MySQL type names, also used for the dialects without a driver
            _ => match name.as_str() {
                "BOOLEAN" => ColumnKind::Bool,
                "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => ColumnKind::BigInt,
                "YEAR" | "BIT" => ColumnKind::Unsigned,
                unsigned if unsigned.ends_with(" UNSIGNED") => ColumnKind::Unsigned,
                "FLOAT" | "DOUBLE" => ColumnKind::Double,
                "DECIMAL" => ColumnKind::Decimal,
                "DATETIME" => ColumnKind::Timestamp,
                "TIMESTAMP" => ColumnKind::TimestampTz,
                "DATE" => ColumnKind::Date,
                "TIME" => ColumnKind::Time,
                "JSON" => ColumnKind::Json,
                "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB"
                | "GEOMETRY" => ColumnKind::Bytes,
                _ => ColumnKind::Text,
            },
        }
    }
}

pub(crate) fn mysql_row(row: &MySqlRow) -> Payload {
    row_map(row, |index, kind| match kind {
        ColumnKind::Bool => typed(row, index, Value::Bool),
        ColumnKind::SmallInt | ColumnKind::Int | ColumnKind::BigInt => {
            typed(row, index, |v: i64| Value::from(v))
        }
        // YEAR arrives without the UNSIGNED flag on some servers
        ColumnKind::Unsigned => typed(row, index, |v: u64| Value::from(v))
            .or_else(|| row.try_get_unchecked::<u16, _>(index).ok().map(Value::from)),
        ColumnKind::Real | ColumnKind::Double => typed(row, index, |v: f64| Value::from(v)),
        ColumnKind::Decimal => typed(row, index, |v: Decimal| Value::String(v.to_string())),
        ColumnKind::Timestamp => typed(row, index, |v: NaiveDateTime| to_json(v)),
        ColumnKind::TimestampTz => typed(row, index, |v: DateTime<Utc>| to_json(v)),
        ColumnKind::Date => typed(row, index, |v: NaiveDate| to_json(v)),
        ColumnKind::Time => typed(row, index, |v: NaiveTime| to_json(v)),
        ColumnKind::Json => typed(row, index, |v: Json<Value>| v.0),
        ColumnKind::Uuid | ColumnKind::Bytes | ColumnKind::Text => None,
    })
}

pub(crate) fn postgres_row(row: &PgRow) -> Payload {
    row_map(row, |index, kind| match kind {
        ColumnKind::Bool => typed(row, index, Value::Bool),
        ColumnKind::SmallInt => typed(row, index, |v: i16| Value::from(v)),
        ColumnKind::Int => typed(row, index, |v: i32| Value::from(v)),
        ColumnKind::BigInt | ColumnKind::Unsigned => typed(row, index, |v: i64| Value::from(v)),
        ColumnKind::Real => typed(row, index, |v: f32| Value::from(f64::from(v))),
        ColumnKind::Double => typed(row, index, |v: f64| Value::from(v)),
        ColumnKind::Decimal => typed(row, index, |v: Decimal| Value::String(v.to_string())),
        ColumnKind::Timestamp => typed(row, index, |v: NaiveDateTime| to_json(v)),
        ColumnKind::TimestampTz => typed(row, index, |v: DateTime<Utc>| to_json(v)),
        ColumnKind::Date => typed(row, index, |v: NaiveDate| to_json(v)),
        ColumnKind::Time => typed(row, index, |v: NaiveTime| to_json(v)),
        ColumnKind::Json => typed(row, index, |v: Json<Value>| v.0),
        ColumnKind::Uuid => typed(row, index, |v: Uuid| Value::String(v.to_string())),
        ColumnKind::Bytes | ColumnKind::Text => None,
    })
}

pub(crate) fn sqlite_row(row: &SqliteRow) -> Payload {
    row_map(row, |index, kind| match kind {
        ColumnKind::Bool => typed(row, index, Value::Bool),
        ColumnKind::SmallInt | ColumnKind::Int | ColumnKind::BigInt | ColumnKind::Unsigned => {
            typed(row, index, |v: i64| Value::from(v))
        }
        ColumnKind::Real | ColumnKind::Double => typed(row, index, |v: f64| Value::from(v)),
        _ => None,
    })
}

/// Walk the columns of `row`, decoding each non-null value with `decode`
/// and falling back to text or bytes when it yields nothing
fn row_map<R, F>(row: &R, mut decode: F) -> Payload
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> String: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
    F: FnMut(usize, ColumnKind) -> Option<Value>,
{
    let dialect = dialect_of::<R>();
    let mut map = Payload::new();

    for (index, column) in row.columns().iter().enumerate() {
        let type_name = match row.try_get_raw(index) {
            Ok(raw) if raw.is_null() => {
                map.insert(column.name().to_string(), Value::Null);
                continue;
            }
            Ok(raw) => raw.type_info().name().to_string(),
            Err(_) => column.type_info().name().to_string(),
        };

        let kind = ColumnKind::of(dialect, &type_name);
        let value = decode(index, kind).unwrap_or_else(|| {
            if !matches!(kind, ColumnKind::Text | ColumnKind::Bytes) {
                tracing::debug!(
                    "Column {} ({}) not decodable as {:?}; reading as text",
                    column.name(),
                    type_name,
                    kind
                );
            }
            fallback(row, index)
        });
        map.insert(column.name().to_string(), value);
    }
    map
}

fn typed<'r, R, T>(row: &'r R, index: usize, convert: impl FnOnce(T) -> Value) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<T, _>(index).ok().map(convert)
}

fn fallback<R>(row: &R, index: usize) -> Value
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> String: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
{
    if let Ok(text) = row.try_get::<String, _>(index) {
        return Value::String(text);
    }
    if let Ok(text) = row.try_get_unchecked::<String, _>(index) {
        return Value::String(text);
    }
    match row.try_get_unchecked::<Vec<u8>, _>(index) {
        Ok(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        Err(_) => Value::Null,
    }
}

fn dialect_of<R: Row>() -> Dialect {
    match <R::Database as sqlx::Database>::NAME {
        "PostgreSQL" => Dialect::Postgres,
        "SQLite" => Dialect::Sqlite,
        _ => Dialect::MySql,
    }
}

fn to_json<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
