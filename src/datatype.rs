// used for persistence
use rusqlite::types::{ToSql, ToSqlOutput};

// used for the document column
use serde::Serialize;
use serde::de::DeserializeOwned;

// used to print out readable forms of a value
use std::fmt;

use crate::error::{Result, TrellisError};

/// The closed set of type tags a fact's payload can carry.
///
/// The numeric codes are what ends up in the `valtype` column and must
/// therefore never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Invalid = 0,
    /// The fact holds a string
    String = 1,
    /// The fact holds an integer
    Int = 2,
    /// The fact holds a double
    Double = 4,
    /// The fact holds a JSON document
    Document = 8,
    /// The fact holds a reference to another resource
    Reference = 16,
}

impl ValueKind {
    pub fn code(self) -> i64 {
        self as i64
    }
    pub fn from_code(code: i64) -> Option<ValueKind> {
        match code {
            0 => Some(ValueKind::Invalid),
            1 => Some(ValueKind::String),
            2 => Some(ValueKind::Int),
            4 => Some(ValueKind::Double),
            8 => Some(ValueKind::Document),
            16 => Some(ValueKind::Reference),
            _ => None,
        }
    }
    pub fn is_valid(self) -> bool {
        self != ValueKind::Invalid
    }
    /// The typed slot in the fact table that holds payloads of this kind.
    pub fn column(self) -> Option<&'static str> {
        match self {
            ValueKind::String => Some("valtext"),
            ValueKind::Int => Some("valint"),
            ValueKind::Double => Some("valdouble"),
            ValueKind::Document => Some("valdoc"),
            ValueKind::Reference => Some("valref"),
            ValueKind::Invalid => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValueKind::String => write!(f, "String"),
            ValueKind::Int => write!(f, "Int (64 bits)"),
            ValueKind::Double => write!(f, "Double (64 bits)"),
            ValueKind::Document => write!(f, "Document (json)"),
            ValueKind::Reference => write!(f, "Reference"),
            ValueKind::Invalid => write!(f, "Invalid"),
        }
    }
}

/// A typed fact payload. Every variant maps to exactly one of the typed
/// slots in the fact table, so a `Value` always has a valid kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Double(f64),
    Document(serde_json::Value),
    Reference(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Int(_) => ValueKind::Int,
            Value::Double(_) => ValueKind::Double,
            Value::Document(_) => ValueKind::Document,
            Value::Reference(_) => ValueKind::Reference,
        }
    }
    /// Wrap any serializable shape as a document value.
    pub fn document<T: Serialize>(shape: &T) -> Result<Value> {
        Ok(Value::Document(serde_json::to_value(shape)?))
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }
    pub fn as_document(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }
    /// The per-slot bindings for one fact row. At most one slot is populated.
    pub(crate) fn slots(
        &self,
    ) -> (
        Option<i64>,
        Option<f64>,
        Option<&str>,
        Option<String>,
        Option<&str>,
    ) {
        match self {
            Value::Int(i) => (Some(*i), None, None, None, None),
            Value::Double(d) => (None, Some(*d), None, None, None),
            Value::String(s) => (None, None, Some(s), None, None),
            Value::Document(d) => (None, None, None, Some(encode_document(d)), None),
            Value::Reference(r) => (None, None, None, None, Some(r)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Document(d) => write!(f, "{}", d),
            Value::Reference(r) => write!(f, "{}", r),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}
impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i as i64)
    }
}
impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}
impl From<f32> for Value {
    fn from(d: f32) -> Self {
        Value::Double(d as f64)
    }
}

/// Structural kind inference for loosely typed input: objects and arrays
/// become documents, strings become strings, integral numbers become ints,
/// fractional numbers become doubles. Booleans and nulls cannot be stored.
impl TryFrom<serde_json::Value> for Value {
    type Error = TrellisError;

    fn try_from(v: serde_json::Value) -> Result<Value> {
        match v {
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(Value::Int(u as i64))
                } else if let Some(d) = n.as_f64() {
                    Ok(Value::Double(d))
                } else {
                    Err(TrellisError::UnsupportedValue(n.to_string()))
                }
            }
            doc @ (serde_json::Value::Object(_) | serde_json::Value::Array(_)) => {
                Ok(Value::Document(doc))
            }
            other => Err(TrellisError::UnsupportedValue(other.to_string())),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::String(s) => Ok(ToSqlOutput::from(s.as_str())),
            Value::Int(i) => Ok(ToSqlOutput::from(*i)),
            Value::Double(d) => Ok(ToSqlOutput::from(*d)),
            Value::Document(d) => Ok(ToSqlOutput::from(encode_document(d))),
            Value::Reference(r) => Ok(ToSqlOutput::from(r.as_str())),
        }
    }
}

/// Serialize a document payload to its column representation. An absent
/// (null) document encodes to an empty object, never to a SQL NULL.
pub fn encode_document(doc: &serde_json::Value) -> String {
    if doc.is_null() {
        String::from("{}")
    } else {
        doc.to_string()
    }
}

/// Deserialize a document column payload into a caller-supplied shape.
/// A zero-length payload leaves `out` untouched.
pub fn decode_document_into<T: DeserializeOwned>(payload: &str, out: &mut T) -> Result<()> {
    if payload.is_empty() {
        return Ok(());
    }
    *out = serde_json::from_str(payload)?;
    Ok(())
}
