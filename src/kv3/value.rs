//! Decoded KV3 value tree.
//!
//! A [`Value`] is an immutable snapshot built once per parse. Accessors fail
//! with [`Error::TypeMismatch`] or [`Error::MissingKey`] when the tree does
//! not have the requested shape; nothing is silently defaulted.

use std::collections::BTreeMap;
use std::fmt;

use crate::util::{Error, Quat, Result, Vec3};

/// Kind of a value node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int16,
    Int32,
    Int64,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
    String,
    Blob,
    Array,
    TypedArray,
    Object,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Map from key to child node.
pub type Object = BTreeMap<String, Value>;

/// A node of the decoded object graph.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
    /// Heterogeneous list.
    Array(Vec<Value>),
    /// List whose elements all share one declared kind.
    TypedArray { kind: ValueKind, items: Vec<Value> },
    Object(Object),
}

impl Value {
    /// Kind of this node.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int16(_) => ValueKind::Int16,
            Self::Int32(_) => ValueKind::Int32,
            Self::Int64(_) => ValueKind::Int64,
            Self::UInt16(_) => ValueKind::UInt16,
            Self::UInt32(_) => ValueKind::UInt32,
            Self::UInt64(_) => ValueKind::UInt64,
            Self::Float(_) => ValueKind::Float,
            Self::Double(_) => ValueKind::Double,
            Self::String(_) => ValueKind::String,
            Self::Blob(_) => ValueKind::Blob,
            Self::Array(_) => ValueKind::Array,
            Self::TypedArray { .. } => ValueKind::TypedArray,
            Self::Object(_) => ValueKind::Object,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn mismatch(&self, expected: &str) -> Error {
        Error::mismatch(expected, self.kind().to_string())
    }

    // ========================================================================
    // Object access
    // ========================================================================

    /// Borrow the entries of an object node.
    pub fn as_object(&self) -> Result<&Object> {
        match self {
            Self::Object(map) => Ok(map),
            _ => Err(self.mismatch("Object")),
        }
    }

    /// Look up a key. Returns `None` for missing keys and for non-objects.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Look up a key that must be present.
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.as_object()?
            .get(key)
            .ok_or_else(|| Error::MissingKey(key.to_string()))
    }

    /// Look up an optional key, treating an explicit null as absent.
    pub fn get_non_null(&self, key: &str) -> Option<&Value> {
        self.get(key).filter(|v| !v.is_null())
    }

    // ========================================================================
    // Scalars
    // ========================================================================

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            _ => Err(self.mismatch("Bool")),
        }
    }

    /// Any integer kind, widened to `i64`.
    pub fn as_i64(&self) -> Result<i64> {
        match *self {
            Self::Int16(v) => Ok(v as i64),
            Self::Int32(v) => Ok(v as i64),
            Self::Int64(v) => Ok(v),
            Self::UInt16(v) => Ok(v as i64),
            Self::UInt32(v) => Ok(v as i64),
            Self::UInt64(v) => i64::try_from(v).map_err(|_| self.mismatch("i64 range")),
            _ => Err(self.mismatch("integer")),
        }
    }

    /// Any non-negative integer.
    pub fn as_u64(&self) -> Result<u64> {
        match *self {
            Self::UInt64(v) => Ok(v),
            _ => u64::try_from(self.as_i64()?).map_err(|_| self.mismatch("unsigned integer")),
        }
    }

    /// Any non-negative integer that fits in `usize`.
    pub fn as_usize(&self) -> Result<usize> {
        usize::try_from(self.as_u64()?).map_err(|_| self.mismatch("usize range"))
    }

    /// Any integer that fits in `i32`.
    pub fn as_i32(&self) -> Result<i32> {
        i32::try_from(self.as_i64()?).map_err(|_| self.mismatch("i32 range"))
    }

    /// Any numeric kind as `f64`.
    pub fn as_f64(&self) -> Result<f64> {
        match *self {
            Self::Float(v) => Ok(v as f64),
            Self::Double(v) => Ok(v),
            _ => self.as_i64().map(|v| v as f64).map_err(|_| self.mismatch("number")),
        }
    }

    /// Any numeric kind as `f32`.
    #[inline]
    pub fn as_f32(&self) -> Result<f32> {
        self.as_f64().map(|v| v as f32)
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Self::String(s) => Ok(s),
            _ => Err(self.mismatch("String")),
        }
    }

    pub fn as_blob(&self) -> Result<&[u8]> {
        match self {
            Self::Blob(b) => Ok(b),
            _ => Err(self.mismatch("Blob")),
        }
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    /// Elements of an array or typed array.
    pub fn as_array(&self) -> Result<&[Value]> {
        match self {
            Self::Array(items) | Self::TypedArray { items, .. } => Ok(items),
            _ => Err(self.mismatch("Array")),
        }
    }

    pub fn f32_array(&self) -> Result<Vec<f32>> {
        self.as_array()?.iter().map(Value::as_f32).collect()
    }

    pub fn i64_array(&self) -> Result<Vec<i64>> {
        self.as_array()?.iter().map(Value::as_i64).collect()
    }

    pub fn bool_array(&self) -> Result<Vec<bool>> {
        self.as_array()?.iter().map(Value::as_bool).collect()
    }

    pub fn str_array(&self) -> Result<Vec<&str>> {
        self.as_array()?.iter().map(Value::as_str).collect()
    }

    /// A three-element numeric array.
    pub fn vec3(&self) -> Result<Vec3> {
        match self.f32_array()?.as_slice() {
            &[x, y, z] => Ok(Vec3::new(x, y, z)),
            other => Err(Error::mismatch("3 numbers", format!("{} elements", other.len()))),
        }
    }

    /// A four-element numeric array in `x, y, z, w` order.
    pub fn quat(&self) -> Result<Quat> {
        match self.f32_array()?.as_slice() {
            &[x, y, z, w] => Ok(Quat::from_xyzw(x, y, z, w)),
            other => Err(Error::mismatch("4 numbers", format!("{} elements", other.len()))),
        }
    }

    // ========================================================================
    // JSON export
    // ========================================================================

    /// Convert to a JSON tree. Blobs become byte arrays, non-finite floats
    /// become null.
    #[cfg(feature = "json")]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int16(v) => Json::from(*v),
            Self::Int32(v) => Json::from(*v),
            Self::Int64(v) => Json::from(*v),
            Self::UInt16(v) => Json::from(*v),
            Self::UInt32(v) => Json::from(*v),
            Self::UInt64(v) => Json::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v as f64).map_or(Json::Null, Json::Number),
            Self::Double(v) => serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number),
            Self::String(s) => Json::String(s.clone()),
            Self::Blob(b) => Json::Array(b.iter().map(|&x| Json::from(x)).collect()),
            Self::Array(items) | Self::TypedArray { items, .. } => {
                Json::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Object(map) => Json::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}
