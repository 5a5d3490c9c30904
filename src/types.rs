//! Core types for the monitor.

use crate::error::{MonitorError, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A dynamically typed store value.
///
/// Serialized untagged, so JSON sees a plain scalar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Name of the variant, used in type mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(other.mismatch("int")),
        }
    }

    /// Floats accept integers as well.
    pub fn as_float(&self) -> Result<f64> {
        match self {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(other.mismatch("float")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_text(&self) -> Result<&str> {
        match self {
            Value::Text(v) => Ok(v),
            other => Err(other.mismatch("text")),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn mismatch(&self, expected: &'static str) -> MonitorError {
        MonitorError::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// The value of one key immediately after one mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub key: String,
    pub value: Value,
}

impl Event {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Coalesced events flushed together to a throttled subscriber.
///
/// Each key appears at most once; batches are ordered by key.
pub type Batch = Vec<Event>;

/// Opaque 256-bit identifier naming one subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken(pub [u8; 32]);

impl RegistrationToken {
    /// Draw a fresh token from the OS entropy source.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; 32];
        OsRng.try_fill_bytes(&mut bytes)?;
        Ok(RegistrationToken(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for log lines and thread names.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({}...)", self.short())
    }
}

impl fmt::Display for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time. A clock before the epoch reads as zero.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Boolean filter over event keys, applied per subscription.
#[derive(Clone)]
pub enum KeyFilter {
    /// Every key passes.
    All,
    /// Keys starting with the given prefix.
    Prefix(String),
    /// An explicit set of keys.
    Keys(Vec<String>),
    /// Arbitrary pure predicate.
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl KeyFilter {
    pub fn all() -> Self {
        KeyFilter::All
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        KeyFilter::Prefix(prefix.into())
    }

    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyFilter::Keys(keys.into_iter().map(Into::into).collect())
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        KeyFilter::Custom(Arc::new(f))
    }

    /// Check whether `key` passes this filter.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Prefix(prefix) => key.starts_with(prefix.as_str()),
            KeyFilter::Keys(keys) => keys.iter().any(|k| k == key),
            KeyFilter::Custom(f) => f(key),
        }
    }
}

impl Default for KeyFilter {
    fn default() -> Self {
        KeyFilter::All
    }
}

impl fmt::Debug for KeyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyFilter::All => write!(f, "All"),
            KeyFilter::Prefix(p) => write!(f, "Prefix({:?})", p),
            KeyFilter::Keys(keys) => write!(f, "Keys({:?})", keys),
            KeyFilter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Int(7).as_int().unwrap(), 7);
        assert_eq!(Value::Int(2).as_float().unwrap(), 2.0);
        assert!(Value::Bool(true).as_bool().unwrap());
        assert_eq!(Value::from("up").as_text().unwrap(), "up");
        assert!(Value::default().is_null());
    }

    #[test]
    fn test_value_mismatch() {
        let err = Value::from("seven").as_int().unwrap_err();
        match err {
            MonitorError::TypeMismatch { expected, found } => {
                assert_eq!(expected, "int");
                assert_eq!(found, "text");
            }
            other => panic!("Expected TypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_value_json_is_untagged() {
        let json = serde_json::to_string(&Event::new("request.count", 3)).unwrap();
        assert_eq!(json, r#"{"key":"request.count","value":3}"#);

        let back: Value = serde_json::from_str("1.5").unwrap();
        assert_eq!(back, Value::Float(1.5));
    }

    #[test]
    fn test_token_unique() {
        let a = RegistrationToken::generate().unwrap();
        let b = RegistrationToken::generate().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.to_hex().len(), 64);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_filters() {
        assert!(KeyFilter::all().matches("anything"));

        let bytes = KeyFilter::prefix("bytes.");
        assert!(bytes.matches("bytes.read.count"));
        assert!(!bytes.matches("session.count"));

        let keys = KeyFilter::keys(["a", "b"]);
        assert!(keys.matches("b"));
        assert!(!keys.matches("c"));

        let odd = KeyFilter::custom(|k| k.len() % 2 == 1);
        assert!(odd.matches("abc"));
        assert!(!odd.matches("ab"));
    }
}
