//! SQL values, type inference, and wire serialization.
//!
//! Every parameter that reaches a query is turned into a [`QueryVariable`]:
//! a serialized [`WireValue`] tagged with the PostgreSQL type used for its
//! explicit `$n::type` cast.

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;

use crate::error::{Result, SqlError};

/// Scalar PostgreSQL types known to the builders and the diff engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SqlType {
    /// `text`
    Text,
    /// `varchar`
    Varchar,
    /// `uuid`
    Uuid,
    /// `boolean`
    Boolean,
    /// `date`
    Date,
    /// `timestamp` (without time zone)
    Timestamp,
    /// `timestamptz`
    TimestampTz,
    /// `smallint`
    SmallInt,
    /// `integer`
    Integer,
    /// `bigint`
    BigInt,
    /// `numeric`
    Numeric,
    /// `real`
    Real,
    /// `double precision`
    DoublePrecision,
    /// `json`
    Json,
    /// `jsonb`
    Jsonb,
}

impl SqlType {
    /// Name used in casts and DDL.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Varchar => "varchar",
            Self::Uuid => "uuid",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamptz",
            Self::SmallInt => "smallint",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Numeric => "numeric",
            Self::Real => "real",
            Self::DoublePrecision => "double precision",
            Self::Json => "json",
            Self::Jsonb => "jsonb",
        }
    }

    /// Name reported by `information_schema.columns.data_type`.
    #[must_use]
    pub const fn catalog_name(self) -> &'static str {
        match self {
            Self::Varchar => "character varying",
            Self::Timestamp => "timestamp without time zone",
            Self::TimestampTz => "timestamp with time zone",
            other => other.name(),
        }
    }

    /// Name reported by `information_schema.columns.udt_name`.
    #[must_use]
    pub const fn udt_name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Varchar => "varchar",
            Self::Uuid => "uuid",
            Self::Boolean => "bool",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamptz",
            Self::SmallInt => "int2",
            Self::Integer => "int4",
            Self::BigInt => "int8",
            Self::Numeric => "numeric",
            Self::Real => "float4",
            Self::DoublePrecision => "float8",
            Self::Json => "json",
            Self::Jsonb => "jsonb",
        }
    }

    /// Type used to cast values written into a column of this type.
    ///
    /// String-like columns all receive `text` parameters.
    #[must_use]
    pub const fn value_cast(self) -> Self {
        match self {
            Self::Text | Self::Varchar | Self::Uuid => Self::Text,
            other => other,
        }
    }

    /// Returns `true` for `json` and `jsonb`.
    #[must_use]
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json | Self::Jsonb)
    }

    /// Returns `true` for the string family (`text`, `varchar`, `uuid`).
    #[must_use]
    pub const fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::Varchar | Self::Uuid)
    }

    const fn is_temporal(self) -> bool {
        matches!(self, Self::Date | Self::Timestamp | Self::TimestampTz)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A column type: a scalar type, optionally as an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnType {
    /// Element type.
    pub sql_type: SqlType,
    /// Whether the column holds an array of `sql_type`.
    pub is_array: bool,
}

impl ColumnType {
    /// A scalar column type.
    #[must_use]
    pub const fn scalar(sql_type: SqlType) -> Self {
        Self {
            sql_type,
            is_array: false,
        }
    }

    /// An array column type.
    #[must_use]
    pub const fn array_of(sql_type: SqlType) -> Self {
        Self {
            sql_type,
            is_array: true,
        }
    }

    /// DDL spelling, e.g. `text[]`.
    #[must_use]
    pub fn ddl(&self) -> String {
        if self.is_array {
            format!("{}[]", self.sql_type.name())
        } else {
            self.sql_type.name().to_string()
        }
    }

    /// Returns `true` when this type matches a catalog `(data_type, udt_name)` pair.
    #[must_use]
    pub fn matches_catalog(&self, data_type: &str, udt_name: &str) -> bool {
        if self.is_array {
            data_type == "ARRAY"
                && udt_name.strip_prefix('_') == Some(self.sql_type.udt_name())
        } else {
            data_type == self.sql_type.catalog_name()
        }
    }
}

impl From<SqlType> for ColumnType {
    fn from(sql_type: SqlType) -> Self {
        Self::scalar(sql_type)
    }
}

/// A value supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Point in time.
    Timestamp(DateTime<Utc>),
    /// Semi-structured value, sent as `jsonb` by default.
    Json(serde_json::Value),
    /// Array of values.
    Array(Vec<SqlValue>),
}

impl SqlValue {
    /// Converts a JSON value into a `SqlValue`.
    ///
    /// With `keep_json` set the value is kept whole (for json columns);
    /// otherwise scalars and arrays map to their SQL counterparts and only
    /// objects stay JSON.
    #[must_use]
    pub fn from_json(value: serde_json::Value, keep_json: bool) -> Self {
        use serde_json::Value;

        if keep_json {
            return match value {
                Value::Null => Self::Null,
                other => Self::Json(other),
            };
        }
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int),
            Value::String(s) => Self::Text(s),
            Value::Array(items) => {
                Self::Array(items.into_iter().map(|v| Self::from_json(v, false)).collect())
            }
            object @ Value::Object(_) => Self::Json(object),
        }
    }

    /// Renders the value as JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(n) => Value::from(*n),
            Self::Float(f) => Value::from(*f),
            Self::Text(s) => Value::String(s.clone()),
            Self::Date(d) => Value::String(iso_date(*d)),
            Self::Timestamp(t) => Value::String(iso_timestamp(t)),
            Self::Json(v) => v.clone(),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// Infers the SQL type of this value.
    ///
    /// `Ok(None)` means an untyped NULL. Arrays take the type of their first
    /// non-null element.
    pub fn infer_type(&self) -> Result<Option<SqlType>> {
        let ty = match self {
            Self::Null => return Ok(None),
            Self::Bool(_) => SqlType::Boolean,
            Self::Int(_) | Self::Float(_) => SqlType::DoublePrecision,
            Self::Text(_) => SqlType::Text,
            Self::Date(_) => SqlType::Date,
            Self::Timestamp(_) => SqlType::Timestamp,
            Self::Json(_) => SqlType::Jsonb,
            Self::Array(items) => {
                let first = items
                    .iter()
                    .find(|item| !matches!(item, Self::Null))
                    .ok_or_else(|| self.unknown_type())?;
                if matches!(first, Self::Array(_)) {
                    return Err(self.unknown_type());
                }
                return first.infer_type();
            }
        };
        Ok(Some(ty))
    }

    fn unknown_type(&self) -> SqlError {
        SqlError::UnknownParameterType {
            value: self.to_string(),
        }
    }

    fn unsupported(&self, sql_type: SqlType) -> SqlError {
        SqlError::UnsupportedValue {
            value: self.to_string(),
            sql_type: sql_type.name().to_string(),
        }
    }

    /// Serializes the value to its wire form for `sql_type`.
    fn serialize(&self, sql_type: Option<SqlType>) -> Result<WireValue> {
        if let Self::Null = self {
            return Ok(WireValue::Null);
        }
        if let Self::Array(items) = self {
            return items
                .iter()
                .map(|item| item.serialize(sql_type))
                .collect::<Result<Vec<_>>>()
                .map(WireValue::Array);
        }
        let Some(ty) = sql_type else {
            return Err(self.unknown_type());
        };

        if ty.is_json() {
            return Ok(match self {
                Self::Text(s) => WireValue::Text(s.clone()),
                Self::Json(serde_json::Value::String(s)) => WireValue::Text(s.clone()),
                other => WireValue::Text(other.to_json().to_string()),
            });
        }
        if ty.is_temporal() {
            return match self {
                Self::Date(d) => Ok(WireValue::Text(iso_date(*d))),
                Self::Timestamp(t) => Ok(WireValue::Text(iso_timestamp(t))),
                Self::Text(s) => Ok(WireValue::Text(s.clone())),
                other => Err(other.unsupported(ty)),
            };
        }
        if ty.is_textual() {
            return match self {
                Self::Text(s) | Self::Json(serde_json::Value::String(s)) => {
                    Ok(WireValue::Text(s.clone()))
                }
                Self::Bool(b) => Ok(WireValue::Text(b.to_string())),
                Self::Int(n) => Ok(WireValue::Text(n.to_string())),
                Self::Float(f) => Ok(WireValue::Text(f.to_string())),
                Self::Date(d) => Ok(WireValue::Text(iso_date(*d))),
                Self::Timestamp(t) => Ok(WireValue::Text(iso_timestamp(t))),
                other => Err(other.unsupported(ty)),
            };
        }
        if ty == SqlType::Boolean {
            return match self {
                Self::Bool(b) => Ok(WireValue::Bool(*b)),
                Self::Text(s) => Ok(WireValue::Text(s.clone())),
                other => Err(other.unsupported(ty)),
            };
        }
        // Numeric family.
        match self {
            Self::Int(n) => Ok(WireValue::Int(*n)),
            Self::Float(f) => Ok(WireValue::Float(*f)),
            Self::Text(s) => Ok(WireValue::Text(s.clone())),
            other => Err(other.unsupported(ty)),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn iso_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A serialized parameter value, ready to be bound by a driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireValue {
    /// NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Double precision float.
    Float(f64),
    /// Text (also carries JSON documents and ISO-8601 dates).
    Text(String),
    /// Array of wire values.
    Array(Vec<WireValue>),
}

/// A typed query parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryVariable {
    /// Cast target, `None` for an untyped NULL.
    pub sql_type: Option<SqlType>,
    /// Whether the parameter is an array.
    pub is_array: bool,
    /// Serialized value.
    pub value: WireValue,
}

impl QueryVariable {
    /// Builds a variable whose type is inferred from the value.
    pub fn infer(value: &SqlValue) -> Result<Self> {
        let sql_type = value.infer_type()?;
        Ok(Self {
            sql_type,
            is_array: matches!(value, SqlValue::Array(_)),
            value: value.serialize(sql_type)?,
        })
    }

    /// Builds a variable with an explicit SQL type.
    ///
    /// Arrays sent as `json`/`jsonb` are serialized as one JSON document.
    pub fn typed(value: &SqlValue, sql_type: SqlType) -> Result<Self> {
        if sql_type.is_json() {
            if let SqlValue::Array(_) = value {
                let whole = SqlValue::Json(value.to_json());
                return Self::typed(&whole, sql_type);
            }
        }
        Ok(Self {
            sql_type: Some(sql_type),
            is_array: matches!(value, SqlValue::Array(_)),
            value: value.serialize(Some(sql_type))?,
        })
    }

    /// Builds an array variable whose elements are sent as `sql_type`.
    ///
    /// Unlike [`QueryVariable::typed`], json element types keep the array
    /// shape and serialize each element as its own document.
    pub fn typed_array(items: &[SqlValue], sql_type: SqlType) -> Result<Self> {
        let items = if sql_type.is_json() {
            items
                .iter()
                .map(|item| match item {
                    SqlValue::Null => SqlValue::Null,
                    other => SqlValue::Text(other.to_json().to_string()),
                })
                .collect()
        } else {
            items.to_vec()
        };
        Ok(Self {
            sql_type: Some(sql_type),
            is_array: true,
            value: SqlValue::Array(items).serialize(Some(sql_type))?,
        })
    }

    /// Returns the `::type` suffix for the placeholder, empty for untyped NULL.
    #[must_use]
    pub fn cast_suffix(&self) -> String {
        match (self.sql_type, self.is_array) {
            (None, _) => String::new(),
            (Some(ty), false) => format!("::{ty}"),
            (Some(ty), true) => format!("::{ty}[]"),
        }
    }
}

/// Trait for types that can be converted to SQL values.
pub trait ToSqlValue {
    /// Converts the value to a `SqlValue`.
    fn to_sql_value(self) -> SqlValue;
}

impl ToSqlValue for SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self
    }
}

impl ToSqlValue for bool {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Bool(self)
    }
}

impl ToSqlValue for i64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(self)
    }
}

impl ToSqlValue for i32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for u32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for f64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(self)
    }
}

impl ToSqlValue for String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self)
    }
}

impl ToSqlValue for &str {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(String::from(self))
    }
}

impl ToSqlValue for NaiveDate {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Date(self)
    }
}

impl ToSqlValue for DateTime<Utc> {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Timestamp(self)
    }
}

impl ToSqlValue for serde_json::Value {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::from_json(self, true)
    }
}

impl<T: ToSqlValue> ToSqlValue for Option<T> {
    fn to_sql_value(self) -> SqlValue {
        match self {
            Some(v) => v.to_sql_value(),
            None => SqlValue::Null,
        }
    }
}

impl<T: ToSqlValue> ToSqlValue for Vec<T> {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Array(self.into_iter().map(ToSqlValue::to_sql_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inference_rules() {
        assert_eq!("a".to_sql_value().infer_type().unwrap(), Some(SqlType::Text));
        assert_eq!(
            2.5_f64.to_sql_value().infer_type().unwrap(),
            Some(SqlType::DoublePrecision)
        );
        assert_eq!(
            7_i32.to_sql_value().infer_type().unwrap(),
            Some(SqlType::DoublePrecision)
        );
        assert_eq!(true.to_sql_value().infer_type().unwrap(), Some(SqlType::Boolean));
        assert_eq!(SqlValue::Null.infer_type().unwrap(), None);
        assert_eq!(
            json!({"a": 1}).to_sql_value().infer_type().unwrap(),
            Some(SqlType::Jsonb)
        );
        assert_eq!(
            Utc::now().to_sql_value().infer_type().unwrap(),
            Some(SqlType::Timestamp)
        );
    }

    #[test]
    fn test_array_takes_first_non_null_element_type() {
        let value = SqlValue::Array(vec![SqlValue::Null, SqlValue::Text("x".into())]);
        assert_eq!(value.infer_type().unwrap(), Some(SqlType::Text));
    }

    #[test]
    fn test_array_without_hint_is_rejected() {
        let empty = SqlValue::Array(vec![]);
        assert!(matches!(
            empty.infer_type(),
            Err(SqlError::UnknownParameterType { .. })
        ));
        let nulls = SqlValue::Array(vec![SqlValue::Null, SqlValue::Null]);
        let err = QueryVariable::infer(&nulls).unwrap_err();
        assert!(err.to_string().contains("[null,null]"));
    }

    #[test]
    fn test_jsonb_is_stringified_unless_string() {
        let var = QueryVariable::infer(&json!({"isCool": true}).to_sql_value()).unwrap();
        assert_eq!(var.value, WireValue::Text(r#"{"isCool":true}"#.into()));
        assert_eq!(var.cast_suffix(), "::jsonb");

        let raw = QueryVariable::typed(&"{\"a\":1}".to_sql_value(), SqlType::Jsonb).unwrap();
        assert_eq!(raw.value, WireValue::Text("{\"a\":1}".into()));
    }

    #[test]
    fn test_dates_render_as_iso_8601() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let var = QueryVariable::infer(&ts.to_sql_value()).unwrap();
        assert_eq!(var.value, WireValue::Text("2024-03-01T10:20:30.000Z".into()));

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let var = QueryVariable::infer(&day.to_sql_value()).unwrap();
        assert_eq!(var.value, WireValue::Text("2024-03-01".into()));
        assert_eq!(var.cast_suffix(), "::date");
    }

    #[test]
    fn test_explicit_cast_overrides_inference() {
        let var = QueryVariable::typed(&true.to_sql_value(), SqlType::Text).unwrap();
        assert_eq!(var.value, WireValue::Text("true".into()));
        assert_eq!(var.cast_suffix(), "::text");
    }

    #[test]
    fn test_unsupported_value_for_cast() {
        let err = QueryVariable::typed(&json!({"a": 1}).to_sql_value(), SqlType::Boolean)
            .unwrap_err();
        assert!(matches!(err, SqlError::UnsupportedValue { .. }));
    }

    #[test]
    fn test_untyped_null_has_no_cast() {
        let var = QueryVariable::infer(&SqlValue::Null).unwrap();
        assert_eq!(var.cast_suffix(), "");
        assert_eq!(var.value, WireValue::Null);
    }

    #[test]
    fn test_array_cast_suffix() {
        let var = QueryVariable::infer(&vec!["a", "b"].to_sql_value()).unwrap();
        assert_eq!(var.cast_suffix(), "::text[]");
    }

    #[test]
    fn test_column_type_matches_catalog() {
        assert!(ColumnType::scalar(SqlType::Varchar).matches_catalog("character varying", "varchar"));
        assert!(ColumnType::array_of(SqlType::Text).matches_catalog("ARRAY", "_text"));
        assert!(!ColumnType::array_of(SqlType::Text).matches_catalog("ARRAY", "_int4"));
        assert!(!ColumnType::scalar(SqlType::Uuid).matches_catalog("text", "text"));
    }
}
