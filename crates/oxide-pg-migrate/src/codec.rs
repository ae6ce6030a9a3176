//! Binding finalized values to sqlx queries and decoding PostgreSQL rows.
//!
//! Every placeholder carries its own cast (`$1::uuid`), so values are sent
//! with the closest native wire type and PostgreSQL converts them.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use oxide_pg_core::error::{Result, SqlError};
use oxide_pg_core::executor::Row;
use oxide_pg_core::prepared::FinalizedQuery;
use oxide_pg_core::value::WireValue;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Column, Postgres, Row as _, TypeInfo};
use uuid::Uuid;

/// A sqlx query with its arguments bound.
pub type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Bool,
    Int,
    Float,
    Text,
}

fn element_kind(position: usize, items: &[WireValue]) -> Result<ElementKind> {
    let mut kind = None;
    for item in items {
        let next = match item {
            WireValue::Null => continue,
            WireValue::Bool(_) => ElementKind::Bool,
            WireValue::Int(_) => ElementKind::Int,
            WireValue::Float(_) => ElementKind::Float,
            WireValue::Text(_) => ElementKind::Text,
            WireValue::Array(_) => return Err(unbindable_array(position, items)),
        };
        kind = match (kind, next) {
            (None, next) => Some(next),
            (Some(current), next) if current == next => Some(current),
            (
                Some(ElementKind::Int | ElementKind::Float),
                ElementKind::Int | ElementKind::Float,
            ) => Some(ElementKind::Float),
            _ => return Err(unbindable_array(position, items)),
        };
    }
    // Empty and all-NULL arrays go out as text[]; the placeholder cast fixes the type.
    Ok(kind.unwrap_or(ElementKind::Text))
}

fn unbindable_array(position: usize, items: &[WireValue]) -> SqlError {
    SqlError::InvalidValue {
        key: format!("${}", position + 1),
        expected: "a flat array of a single scalar kind",
        value: serde_json::to_string(items).unwrap_or_default(),
    }
}

const fn as_bool(value: &WireValue) -> Option<bool> {
    match value {
        WireValue::Bool(b) => Some(*b),
        _ => None,
    }
}

const fn as_int(value: &WireValue) -> Option<i64> {
    match value {
        WireValue::Int(n) => Some(*n),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
const fn as_float(value: &WireValue) -> Option<f64> {
    match value {
        WireValue::Int(n) => Some(*n as f64),
        WireValue::Float(f) => Some(*f),
        _ => None,
    }
}

fn as_text(value: &WireValue) -> Option<String> {
    match value {
        WireValue::Text(s) => Some(s.clone()),
        _ => None,
    }
}

fn bind_value<'q>(query: PgQuery<'q>, position: usize, value: &WireValue) -> Result<PgQuery<'q>> {
    let query = match value {
        WireValue::Null => query.bind(None::<String>),
        WireValue::Bool(b) => query.bind(*b),
        WireValue::Int(n) => query.bind(*n),
        WireValue::Float(f) => query.bind(*f),
        WireValue::Text(s) => query.bind(s.clone()),
        WireValue::Array(items) => match element_kind(position, items)? {
            ElementKind::Bool => query.bind(items.iter().map(as_bool).collect::<Vec<_>>()),
            ElementKind::Int => query.bind(items.iter().map(as_int).collect::<Vec<_>>()),
            ElementKind::Float => query.bind(items.iter().map(as_float).collect::<Vec<_>>()),
            ElementKind::Text => query.bind(items.iter().map(as_text).collect::<Vec<_>>()),
        },
    };
    Ok(query)
}

/// Builds a sqlx query for `query`, binding `values[n]` to `$n+1`.
pub fn bind_query(query: &FinalizedQuery) -> Result<PgQuery<'_>> {
    query
        .values
        .iter()
        .enumerate()
        .try_fold(sqlx::query(&query.text), |bound, (position, value)| {
            bind_value(bound, position, value)
        })
}

/// Converts a driver row into a JSON row keyed by column label.
///
/// Timestamps become RFC 3339 strings and UUIDs their hyphenated form.
/// Types without a native mapping (`name`, `information_schema` domains,
/// enums) are read as text.
pub fn decode_row(row: &PgRow) -> std::result::Result<Row, sqlx::Error> {
    let mut map = Row::new();
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name())?;
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

fn decode_column(
    row: &PgRow,
    index: usize,
    type_name: &str,
) -> std::result::Result<Value, sqlx::Error> {
    let value = match type_name {
        "BOOL" => Value::from(row.try_get::<Option<bool>, _>(index)?),
        "INT2" => Value::from(row.try_get::<Option<i16>, _>(index)?),
        "INT4" => Value::from(row.try_get::<Option<i32>, _>(index)?),
        "INT8" => Value::from(row.try_get::<Option<i64>, _>(index)?),
        "FLOAT4" => Value::from(row.try_get::<Option<f32>, _>(index)?),
        "FLOAT8" => Value::from(row.try_get::<Option<f64>, _>(index)?),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?.unwrap_or(Value::Null),
        "UUID" => Value::from(row.try_get::<Option<Uuid>, _>(index)?.map(|id| id.to_string())),
        "TIMESTAMPTZ" => Value::from(
            row.try_get::<Option<DateTime<Utc>>, _>(index)?
                .map(|at| at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        ),
        "TIMESTAMP" => Value::from(
            row.try_get::<Option<NaiveDateTime>, _>(index)?
                .map(|at| at.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        ),
        "DATE" => Value::from(
            row.try_get::<Option<NaiveDate>, _>(index)?
                .map(|day| day.to_string()),
        ),
        "BOOL[]" => Value::from(row.try_get::<Option<Vec<Option<bool>>>, _>(index)?),
        "INT2[]" => Value::from(row.try_get::<Option<Vec<Option<i16>>>, _>(index)?),
        "INT4[]" => Value::from(row.try_get::<Option<Vec<Option<i32>>>, _>(index)?),
        "INT8[]" => Value::from(row.try_get::<Option<Vec<Option<i64>>>, _>(index)?),
        "FLOAT4[]" => Value::from(row.try_get::<Option<Vec<Option<f32>>>, _>(index)?),
        "FLOAT8[]" => Value::from(row.try_get::<Option<Vec<Option<f64>>>, _>(index)?),
        "TEXT[]" | "VARCHAR[]" => {
            Value::from(row.try_get::<Option<Vec<Option<String>>>, _>(index)?)
        }
        "UUID[]" => Value::from(row.try_get::<Option<Vec<Option<Uuid>>>, _>(index)?.map(
            |ids| {
                ids.into_iter()
                    .map(|id| id.map(|id| id.to_string()))
                    .collect::<Vec<_>>()
            },
        )),
        "NUMERIC" | "NUMERIC[]" => {
            return Err(sqlx::Error::Decode(
                "numeric columns must be cast to text or double precision".into(),
            ))
        }
        // information_schema.cardinal_number is a domain over integer
        "cardinal_number" => Value::from(row.try_get_unchecked::<Option<i32>, _>(index)?),
        _ => Value::from(row.try_get_unchecked::<Option<String>, _>(index)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_element_kinds() {
        let ints = [WireValue::Int(1), WireValue::Null, WireValue::Int(3)];
        assert_eq!(element_kind(0, &ints).unwrap(), ElementKind::Int);

        let mixed_numbers = [WireValue::Int(1), WireValue::Float(2.5)];
        assert_eq!(element_kind(0, &mixed_numbers).unwrap(), ElementKind::Float);

        assert_eq!(element_kind(0, &[]).unwrap(), ElementKind::Text);
        assert_eq!(element_kind(0, &[WireValue::Null]).unwrap(), ElementKind::Text);
    }

    #[test]
    fn test_mixed_or_nested_arrays_are_rejected() {
        let mixed = [WireValue::Text("a".into()), WireValue::Bool(true)];
        let err = element_kind(1, &mixed).unwrap_err();
        assert!(matches!(
            err,
            SqlError::InvalidValue { ref key, .. } if key == "$2"
        ));

        let nested = [WireValue::Array(vec![WireValue::Int(1)])];
        assert!(element_kind(0, &nested).is_err());
    }

    #[test]
    fn test_element_conversion() {
        assert_eq!(as_float(&WireValue::Int(2)), Some(2.0));
        assert_eq!(as_int(&WireValue::Null), None);
        assert_eq!(as_text(&WireValue::Text("x".into())), Some("x".to_string()));
        assert_eq!(as_bool(&WireValue::Bool(false)), Some(false));
    }

    #[test]
    fn test_bind_rejects_before_sending() {
        let query = FinalizedQuery {
            text: "SELECT $1::text[]".to_string(),
            values: vec![WireValue::Array(vec![
                WireValue::Text("a".into()),
                WireValue::Int(1),
            ])],
        };
        assert!(bind_query(&query).is_err());
    }
}
