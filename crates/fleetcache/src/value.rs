//! Raw values at the client boundary.
//!
//! Every value read from the store comes back as a [`CacheValue`]: either
//! absent or a byte string. Typed interpretation (integers, UTF-8) happens in
//! the accessor layer through [`CacheValue::parse_or`] and friends, so a
//! value that does not parse simply yields the caller's default.

use std::borrow::Cow;
use std::str::FromStr;

use redis::{FromRedisValue, RedisResult, Value};

/// A value fetched from the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheValue {
    /// Missing key, missing field, or a failed read.
    #[default]
    Absent,
    Present(Vec<u8>),
}

impl CacheValue {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Present(bytes) => Some(bytes),
            Self::Absent => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Present(bytes) => Some(bytes),
            Self::Absent => None,
        }
    }

    /// The value as UTF-8, `None` when absent or not valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// The value as text; absent values become the empty string.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        match self {
            Self::Present(bytes) => String::from_utf8_lossy(bytes),
            Self::Absent => Cow::Borrowed(""),
        }
    }

    pub fn parse<T: FromStr>(&self) -> Option<T> {
        self.as_str()?.parse().ok()
    }

    /// Parse the value, falling back to `default` when absent or malformed.
    pub fn parse_or<T: FromStr>(&self, default: T) -> T {
        self.parse().unwrap_or(default)
    }

    /// Apply `f` to present bytes.
    pub fn map_bytes(self, f: impl FnOnce(Vec<u8>) -> Vec<u8>) -> Self {
        match self {
            Self::Present(bytes) => Self::Present(f(bytes)),
            Self::Absent => Self::Absent,
        }
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Nil => Self::Absent,
            Value::BulkString(bytes) => Self::Present(bytes),
            Value::SimpleString(s) => Self::Present(s.into_bytes()),
            Value::VerbatimString { text, .. } => Self::Present(text.into_bytes()),
            Value::Okay => Self::Present(b"OK".to_vec()),
            Value::Int(i) => Self::Present(i.to_string().into_bytes()),
            Value::Double(d) => Self::Present(d.to_string().into_bytes()),
            Value::Boolean(b) => Self::Present(if b { b"1".to_vec() } else { b"0".to_vec() }),
            other => {
                tracing::debug!(value = ?other, "non-scalar reply treated as absent");
                Self::Absent
            }
        }
    }
}

impl From<Option<Vec<u8>>> for CacheValue {
    fn from(value: Option<Vec<u8>>) -> Self {
        value.map_or(Self::Absent, Self::Present)
    }
}

impl FromRedisValue for CacheValue {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        Ok(Self::from(v.clone()))
    }

    fn from_owned_redis_value(v: Value) -> RedisResult<Self> {
        Ok(Self::from(v))
    }
}

/// Interpret a reply as a boolean (`1`, `OK`, `true` → true; anything else → false).
pub(crate) fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Int(i) => *i != 0,
        Value::Boolean(b) => *b,
        Value::Okay => true,
        Value::BulkString(bytes) => bytes.as_slice() == b"1",
        _ => false,
    }
}

/// Interpret a reply as a list of strings; anything else is empty.
pub(crate) fn value_to_strings(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) | Value::Set(items) => items
            .into_iter()
            .filter_map(|item| CacheValue::from(item).as_str().map(str::to_owned))
            .collect(),
        _ => Vec::new(),
    }
}

/// Interpret a flat `[field, value, field, value, ...]` or map reply.
pub(crate) fn value_to_pairs(value: Value) -> Vec<(String, CacheValue)> {
    match value {
        Value::Array(items) => {
            let mut pairs = Vec::with_capacity(items.len() / 2);
            let mut iter = items.into_iter();
            while let (Some(field), Some(val)) = (iter.next(), iter.next()) {
                if let Some(field) = CacheValue::from(field).as_str() {
                    pairs.push((field.to_owned(), CacheValue::from(val)));
                }
            }
            pairs
        }
        Value::Map(entries) => entries
            .into_iter()
            .filter_map(|(field, val)| {
                CacheValue::from(field)
                    .as_str()
                    .map(|f| (f.to_owned(), CacheValue::from(val)))
            })
            .collect(),
        _ => Vec::new(),
    }
}
