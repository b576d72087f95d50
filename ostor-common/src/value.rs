//! # Tagged Scalar Values
//!
//! Purpose: Encode and decode the polymorphic stored-value format. Every
//! stored value carries a one-byte namespace tag: raw text/bytes or a
//! pre-serialized JSON document.
//!
//! ## Design Principles
//! 1. **Explicit Sum Type**: The tag byte is modeled as `Value::{Raw, Json}`
//!    instead of being inspected ad hoc at call sites.
//! 2. **Infallible Accessors**: Scalar accessors return zero values on
//!    non-parsable input, mirroring the store's lenient read contract.
//! 3. **Binary-Safe**: Payloads are raw bytes; only the accessors assume text.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Namespace tag for raw text/byte payloads.
pub const VALUE_NS_RAW: u8 = 0x00;

/// Namespace tag for JSON document payloads.
pub const VALUE_NS_JSON: u8 = 20;

/// A stored scalar value, split by its namespace tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Tag 0x00: raw bytes, interpreted textually by the scalar accessors.
    Raw(Bytes),
    /// Tag 20: a serialized JSON document.
    Json(Bytes),
}

impl Value {
    /// Wraps raw bytes without further interpretation.
    pub fn raw(data: impl Into<Bytes>) -> Value {
        Value::Raw(data.into())
    }

    /// Serializes `v` into a JSON-tagged value.
    pub fn json<T: Serialize>(v: &T) -> Result<Value, serde_json::Error> {
        Ok(Value::Json(Bytes::from(serde_json::to_vec(v)?)))
    }

    /// Splits stored bytes on the leading namespace tag.
    ///
    /// Bytes with no recognized tag are kept verbatim as `Raw`; stores
    /// written before tagging rely on this.
    pub fn decode(data: &[u8]) -> Value {
        match data.first() {
            Some(&VALUE_NS_RAW) => Value::Raw(Bytes::copy_from_slice(&data[1..])),
            Some(&VALUE_NS_JSON) => Value::Json(Bytes::copy_from_slice(&data[1..])),
            _ => Value::Raw(Bytes::copy_from_slice(data)),
        }
    }

    /// Renders the tagged wire form: one tag byte followed by the payload.
    pub fn encode(&self) -> Vec<u8> {
        let (tag, payload) = match self {
            Value::Raw(data) => (VALUE_NS_RAW, data),
            Value::Json(data) => (VALUE_NS_JSON, data),
        };
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(tag);
        out.extend_from_slice(payload);
        out
    }

    /// Payload bytes without the tag.
    pub fn payload(&self) -> &[u8] {
        match self {
            Value::Raw(data) | Value::Json(data) => data,
        }
    }

    /// Payload as owned text; invalid UTF-8 is replaced.
    pub fn string(&self) -> String {
        String::from_utf8_lossy(self.payload()).into_owned()
    }

    /// Payload parsed as a signed decimal integer, or 0.
    pub fn i64(&self) -> i64 {
        self.text().and_then(|s| s.parse().ok()).unwrap_or(0)
    }

    /// Payload parsed as an unsigned decimal integer, or 0.
    pub fn u64(&self) -> u64 {
        self.text().and_then(|s| s.parse().ok()).unwrap_or(0)
    }

    /// Payload parsed as a decimal float, or 0.0.
    pub fn f64(&self) -> f64 {
        self.text().and_then(|s| s.parse().ok()).unwrap_or(0.0)
    }

    /// Truthy-text interpretation of the payload.
    ///
    /// Accepts "1", "t", "true", "yes" and "on", case-insensitively.
    pub fn bool(&self) -> bool {
        match self.text() {
            Some(s) => matches!(
                s.to_ascii_lowercase().as_str(),
                "1" | "t" | "true" | "yes" | "on"
            ),
            None => false,
        }
    }

    /// Deserializes the payload as JSON into `T`.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.payload())
    }

    fn text(&self) -> Option<&str> {
        std::str::from_utf8(self.payload()).ok().map(str::trim)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::raw(v.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::raw(v.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Value {
        Value::raw(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Value {
        Value::raw(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::raw(v.to_string().into_bytes())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Value {
        Value::raw(v.to_string().into_bytes())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::raw(v.to_string().into_bytes())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::raw(if v { &b"1"[..] } else { &b"0"[..] })
    }
}
