//! Decoding of raw selections.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::{Result, SqlError};

/// Validates or coerces the driver value of a raw selection.
///
/// NULL passes through every decoder.
#[derive(Debug, Clone, Copy)]
pub enum RawDecoder {
    /// Any value, unchanged.
    Any,
    /// A number; numeric strings are parsed.
    Number,
    /// An integer; integral strings are parsed.
    Integer,
    /// A string.
    Text,
    /// A boolean.
    Boolean,
    /// A timestamp, normalized to RFC 3339 in UTC.
    Timestamp,
    /// A JSON object or array.
    Json,
    /// A caller supplied decoder returning `None` on mismatch.
    Custom {
        /// What the decoder expects, used in error messages.
        expected: &'static str,
        /// The decoding function.
        decode: fn(&Value) -> Option<Value>,
    },
}

impl RawDecoder {
    const fn expected(&self) -> &'static str {
        match self {
            Self::Any => "any value",
            Self::Number => "a number",
            Self::Integer => "an integer",
            Self::Text => "a string",
            Self::Boolean => "a boolean",
            Self::Timestamp => "a timestamp",
            Self::Json => "a json object or array",
            Self::Custom { expected, .. } => *expected,
        }
    }

    /// Decodes the value stored under `key`.
    pub fn decode(&self, key: &str, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let decoded = match self {
            Self::Any => Some(value.clone()),
            Self::Number => match value {
                Value::Number(_) => Some(value.clone()),
                Value::String(s) => s
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number),
                _ => None,
            },
            Self::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
                Value::Number(n) => n.as_f64().and_then(integral).map(Value::from),
                Value::String(s) => s.parse::<i64>().ok().map(Value::from),
                _ => None,
            },
            Self::Text => value.is_string().then(|| value.clone()),
            Self::Boolean => value.is_boolean().then(|| value.clone()),
            Self::Timestamp => value.as_str().and_then(parse_timestamp).map(Value::String),
            Self::Json => (value.is_object() || value.is_array()).then(|| value.clone()),
            Self::Custom { decode, .. } => decode(value),
        };
        decoded.ok_or_else(|| SqlError::InvalidValue {
            key: key.to_string(),
            expected: self.expected(),
            value: value.to_string(),
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn integral(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f.is_finite()).then_some(f as i64)
}

fn parse_timestamp(s: &str) -> Option<String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(
            ts.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|naive| naive.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true))
}
