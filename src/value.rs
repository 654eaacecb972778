// used for persistence
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

// used for timestamps in the database
use chrono::{DateTime, SecondsFormat, Utc};

// used in model files
use serde::{Deserialize, Serialize};

// used to print out readable forms of a value
use std::fmt;

use crate::error::{Error, Result};

/// The declared type of an attribute or identifier column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Real,
    Text,
    Boolean,
    Timestamp,
}

impl ValueType {
    /// Column affinity used when the schema is created.
    pub fn affinity(&self) -> &'static str {
        match self {
            ValueType::Integer | ValueType::Boolean => "integer",
            ValueType::Real => "real",
            ValueType::Text | ValueType::Timestamp => "text",
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Integer => "Integer",
            ValueType::Real => "Real",
            ValueType::Text => "Text",
            ValueType::Boolean => "Boolean",
            ValueType::Timestamp => "Timestamp",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ValueType::Integer),
            Value::Real(_) => Some(ValueType::Real),
            Value::Text(_) => Some(ValueType::Text),
            Value::Boolean(_) => Some(ValueType::Boolean),
            Value::Timestamp(_) => Some(ValueType::Timestamp),
        }
    }
    /// Whether this value may be stored in, or compared with, a field of the given type.
    /// Null fits everything; integers are widened for real columns.
    pub fn fits(&self, value_type: ValueType) -> bool {
        match (self, value_type) {
            (Value::Null, _) => true,
            (Value::Integer(_), ValueType::Real) => true,
            (v, t) => v.value_type() == Some(t),
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
    /// Reads a column value of a known declared type.
    pub fn convert(value_type: ValueType, value: ValueRef<'_>) -> Result<Value> {
        if let ValueRef::Null = value {
            return Ok(Value::Null);
        }
        let converted = match value_type {
            ValueType::Integer => Value::Integer(value.as_i64()?),
            ValueType::Real => match value {
                ValueRef::Integer(i) => Value::Real(i as f64),
                other => Value::Real(other.as_f64()?),
            },
            ValueType::Text => Value::Text(value.as_str()?.to_owned()),
            ValueType::Boolean => Value::Boolean(value.as_i64()? != 0),
            ValueType::Timestamp => {
                let text = value.as_str()?;
                let parsed = DateTime::parse_from_rfc3339(text).map_err(|e| {
                    Error::execution(format!("Stored timestamp '{text}' is malformed: {e}"))
                })?;
                Value::Timestamp(parsed.with_timezone(&Utc))
            }
        };
        Ok(converted)
    }
}

// timestamps are written with a fixed precision so that text comparison orders them
fn timestamp_text(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(r) => ToSqlOutput::from(*r),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Boolean(b) => ToSqlOutput::from(*b as i64),
            Value::Timestamp(t) => ToSqlOutput::from(timestamp_text(t)),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "\"{s}\""),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Timestamp(t) => write!(f, "'{}'", timestamp_text(t)),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self { Value::Integer(i) }
}
impl From<f64> for Value {
    fn from(r: f64) -> Self { Value::Real(r) }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Boolean(b) }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_owned()) }
}
impl From<String> for Value {
    fn from(s: String) -> Self { Value::Text(s) }
}
impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self { Value::Timestamp(t) }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
