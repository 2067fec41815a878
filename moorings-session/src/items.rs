//! Session items: an ordered, name-addressed collection of typed values.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{SessionError, SessionResult};

/// A single session value.
///
/// The variants mirror the value kinds the item codec can store. Anything
/// else is stored as an opaque [`SessionValue::Object`] blob; use
/// [`SessionValue::json`] to put a serde type there.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValue {
    String(String),
    Int32(i32),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    /// 128-bit decimal in its raw 16-byte form.
    Decimal([u8; 16]),
    Byte(u8),
    Char(char),
    Single(f32),
    Double(f64),
    SByte(i8),
    Int16(i16),
    Int64(i64),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    TimeSpan(TimeDelta),
    Guid(Uuid),
    /// Opaque serialized object.
    Object(Vec<u8>),
    Null,
}

impl SessionValue {
    /// Store a serde value as a JSON object blob.
    pub fn json<T: Serialize>(value: &T) -> SessionResult<Self> {
        Ok(Self::Object(serde_json::to_vec(value)?))
    }

    /// Read an object blob written by [`SessionValue::json`].
    pub fn to_json<T: DeserializeOwned>(&self) -> SessionResult<T> {
        match self {
            Self::Object(bytes) => Ok(serde_json::from_slice(bytes)?),
            other => Err(SessionError::Serialization(format!(
                "expected an object value, found {}",
                other.kind()
            ))),
        }
    }

    /// Name of the value kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int32(_) => "int32",
            Self::Boolean(_) => "boolean",
            Self::DateTime(_) => "datetime",
            Self::Decimal(_) => "decimal",
            Self::Byte(_) => "byte",
            Self::Char(_) => "char",
            Self::Single(_) => "single",
            Self::Double(_) => "double",
            Self::SByte(_) => "sbyte",
            Self::Int16(_) => "int16",
            Self::Int64(_) => "int64",
            Self::UInt16(_) => "uint16",
            Self::UInt32(_) => "uint32",
            Self::UInt64(_) => "uint64",
            Self::TimeSpan(_) => "timespan",
            Self::Guid(_) => "guid",
            Self::Object(_) => "object",
            Self::Null => "null",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            Self::Int32(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Single(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for SessionValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for SessionValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i32> for SessionValue {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<i64> for SessionValue {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<bool> for SessionValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for SessionValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<DateTime<Utc>> for SessionValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

impl From<Uuid> for SessionValue {
    fn from(value: Uuid) -> Self {
        Self::Guid(value)
    }
}

impl<T: Into<SessionValue>> From<Option<T>> for SessionValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Named session values in insertion order.
///
/// Names compare ASCII case-insensitively; inserting under an existing name
/// replaces the value in place and keeps the original position and spelling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionItems {
    entries: Vec<(String, SessionValue)>,
}

impl SessionItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    /// Get a value by name.
    pub fn get(&self, name: &str) -> Option<&SessionValue> {
        self.position(name).map(|i| &self.entries[i].1)
    }

    /// Get a mutable value by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut SessionValue> {
        self.position(name).map(|i| &mut self.entries[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<SessionValue>,
    ) -> Option<SessionValue> {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    /// Remove a value by name.
    pub fn remove(&mut self, name: &str) -> Option<SessionValue> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Item names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SessionValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K: Into<String>, V: Into<SessionValue>> FromIterator<(K, V)> for SessionItems {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut items = Self::new();
        for (name, value) in iter {
            items.insert(name, value);
        }
        items
    }
}

impl IntoIterator for SessionItems {
    type Item = (String, SessionValue);
    type IntoIter = std::vec::IntoIter<(String, SessionValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
