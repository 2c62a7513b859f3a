//! Document values and stored value slots
//!
//! [`Value`] is the document model: null, booleans, numbers, strings, arrays
//! and string-keyed objects. It serializes with MessagePack and converts
//! from `serde_json::Value`.
//!
//! [`Stored`] is what an index node actually holds: a small value inline, or
//! an [`ObjectRef`] to a value saved out of line by the storage backend.
//! Callers never see the difference; reads resolve references.

use crate::error::{Error, Result};
use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Document value
///
/// Equality follows IEEE-754 for numbers (`NaN != NaN`, `-0.0 == 0.0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of value
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit float
    Number(f64),
    /// UTF-8 string
    String(String),
    /// Ordered sequence
    Array(Vec<Value>),
    /// String-keyed map
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the type name as a string (for error messages)
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Number(_) => "Number",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
        }
    }

    /// Build an object from field pairs
    pub fn object<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as f64
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get a field of an object
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(field),
            _ => None,
        }
    }

    /// Equality that treats every NaN as equal to every other NaN
    ///
    /// Used when comparing an observed value against a committed one.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.same_as(vb))
            }
            _ => self == other,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&Key> for Value {
    /// Ids become their hex string; everything else maps one to one.
    fn from(key: &Key) -> Self {
        match key {
            Key::Null => Value::Null,
            Key::Bool(b) => Value::Bool(*b),
            Key::Number(n) => Value::Number(*n),
            Key::String(s) => Value::String(s.clone()),
            Key::Id8(_) | Key::Id14(_) => Value::String(key.id_hex().unwrap_or_default()),
            Key::Array(items) => Value::Array(items.iter().map(Value::from).collect()),
        }
    }
}

impl TryFrom<&Value> for Key {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Key> {
        match value {
            Value::Null => Ok(Key::Null),
            Value::Bool(b) => Ok(Key::Bool(*b)),
            Value::Number(n) => Ok(Key::Number(*n)),
            Value::String(s) => {
                let key = Key::String(s.clone());
                key.validate()?;
                Ok(key)
            }
            Value::Array(items) => Ok(Key::Array(
                items.iter().map(Key::try_from).collect::<Result<_>>()?,
            )),
            Value::Object(_) => Err(Error::InvalidKey(
                "objects cannot be used as keys".to_string(),
            )),
        }
    }
}

// ============================================================================
// Object references and stored slots
// ============================================================================

/// Identifier of an object saved by a storage backend
///
/// Ids are unique per store and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef(u64);

impl ObjectRef {
    /// Wrap a raw id
    pub const fn new(id: u64) -> Self {
        ObjectRef(id)
    }

    /// Raw id
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Value slot of an index node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stored {
    /// Small value kept in the node itself
    Inline(Value),
    /// Value saved out of line
    Ref(ObjectRef),
}

impl Stored {
    /// Whether `value` should be kept inline
    ///
    /// Null, booleans and numbers always are; strings are when their UTF-8
    /// length is at most `string_limit`. Arrays and objects never are.
    pub fn fits_inline(value: &Value, string_limit: usize) -> bool {
        match value {
            Value::Null | Value::Bool(_) | Value::Number(_) => true,
            Value::String(s) => s.len() <= string_limit,
            Value::Array(_) | Value::Object(_) => false,
        }
    }

    /// Object reference, if stored out of line
    pub fn object_ref(&self) -> Option<ObjectRef> {
        match self {
            Stored::Ref(r) => Some(*r),
            Stored::Inline(_) => None,
        }
    }

    /// Identity comparison used by conflict detection
    ///
    /// Inline values compare by value; references compare by id, so two
    /// writes of equal content are still different versions.
    pub fn same_version(&self, other: &Stored) -> bool {
        match (self, other) {
            (Stored::Inline(a), Stored::Inline(b)) => a.same_as(b),
            (Stored::Ref(a), Stored::Ref(b)) => a == b,
            _ => false,
        }
    }
}
