//! # Work payloads.
//!
//! The dispatch core never interprets payloads; it only moves them between the
//! source and the handler. [`Payload`] keeps both shapes a backend produces:
//! raw bytes (queue bodies, stream records) and structured JSON (requests,
//! workflow nodes).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque bytes or a structured value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// No payload.
    #[default]
    Empty,
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Structured value.
    Json(Value),
}

impl Payload {
    /// Wraps raw bytes.
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Payload::Bytes(data.into())
    }

    /// Wraps a JSON value.
    pub fn json(value: Value) -> Self {
        Payload::Json(value)
    }

    /// Returns the JSON value, if this is a structured payload.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the raw bytes, if this is a byte payload.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// True for [`Payload::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    /// Lossless JSON view used when payloads are composed (workflow inputs).
    ///
    /// `Empty` → `null`; UTF-8 bytes → string; other bytes → array of numbers.
    pub fn to_json(&self) -> Value {
        match self {
            Payload::Empty => Value::Null,
            Payload::Json(v) => v.clone(),
            Payload::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => Value::String(s.to_owned()),
                Err(_) => Value::Array(b.iter().map(|x| Value::from(*x)).collect()),
            },
        }
    }

    /// Size hint for logs.
    pub fn len_hint(&self) -> usize {
        match self {
            Payload::Empty => 0,
            Payload::Bytes(b) => b.len(),
            Payload::Json(_) => 1,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Bytes(data)
    }
}
