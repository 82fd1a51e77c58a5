//! Tagged message envelope.
//!
//! Every payload published through the adapter is a single ASCII tag byte
//! followed by the encoded body:
//!
//! ```text
//! ┌──────────┬───────────────────────────────────────────────┐
//! │ Tag (1B) │ Body                                          │
//! ├──────────┼───────────────────────────────────────────────┤
//! │ 'a'      │ JSON structured data (keyed container, array) │
//! │ 'o'      │ MessagePack opaque object                     │
//! │ 's'      │ UTF-8 text, verbatim                          │
//! │ 'n'      │ decimal text of a floating point number       │
//! └──────────┴───────────────────────────────────────────────┘
//! ```
//!
//! A payload whose first byte is none of the above, or an empty payload,
//! decodes to [`QueueValue::Null`] without error. Malformed `a`, `o` and `s`
//! bodies are reported as [`EnvelopeError`]. An `n` body never fails: it
//! reads as its leading decimal number, or zero when there is none.
//!
//! The `o` tag carries MessagePack written by this crate. Producers in other
//! languages use their own native object formats under the same tag, so
//! objects only round-trip between processes built on this crate.

use crate::error::EnvelopeError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, de::IgnoredAny, Serialize};

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;

// ============================================================================
// Envelope Tag
// ============================================================================

/// Type hint carried in the first byte of every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeTag {
    Structured,
    Object,
    Text,
    Number,
}

impl EnvelopeTag {
    pub const STRUCTURED_BYTE: u8 = b'a';
    pub const OBJECT_BYTE: u8 = b'o';
    pub const TEXT_BYTE: u8 = b's';
    pub const NUMBER_BYTE: u8 = b'n';

    /// Convert tag to wire byte
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Structured => Self::STRUCTURED_BYTE,
            Self::Object => Self::OBJECT_BYTE,
            Self::Text => Self::TEXT_BYTE,
            Self::Number => Self::NUMBER_BYTE,
        }
    }

    /// Parse tag from wire byte
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            Self::STRUCTURED_BYTE => Some(Self::Structured),
            Self::OBJECT_BYTE => Some(Self::Object),
            Self::TEXT_BYTE => Some(Self::Text),
            Self::NUMBER_BYTE => Some(Self::Number),
            _ => None,
        }
    }
}

// ============================================================================
// Values
// ============================================================================

/// A value that can travel through a queue
#[derive(Debug, Clone, PartialEq)]
pub enum QueueValue {
    /// Keyed container or array, carried as JSON
    Structured(serde_json::Value),
    /// Serialized Rust value, see [`OpaqueObject`]
    Object(OpaqueObject),
    Text(String),
    /// All numbers travel as `f64`; integers come back as floats
    Number(f64),
    /// Absence of a value
    Null,
}

impl QueueValue {
    /// Wrap any serializable value as an opaque object
    pub fn object<T: Serialize>(value: &T) -> Result<Self, EnvelopeError> {
        Ok(Self::Object(OpaqueObject::from_value(value)?))
    }

    /// Tag this value is published under, `None` for [`QueueValue::Null`]
    pub fn tag(&self) -> Option<EnvelopeTag> {
        match self {
            Self::Structured(_) => Some(EnvelopeTag::Structured),
            Self::Object(_) => Some(EnvelopeTag::Object),
            Self::Text(_) => Some(EnvelopeTag::Text),
            Self::Number(_) => Some(EnvelopeTag::Number),
            Self::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&OpaqueObject> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(number) => Some(*number),
            _ => None,
        }
    }

    /// Render the value as JSON for display and logging.
    ///
    /// Non-finite numbers and objects that do not map onto JSON render as
    /// `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Structured(value) => value.clone(),
            Self::Object(object) => object
                .deserialize::<serde_json::Value>()
                .unwrap_or(serde_json::Value::Null),
            Self::Text(text) => serde_json::Value::String(text.clone()),
            Self::Number(number) => serde_json::Number::from_f64(*number)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Null => serde_json::Value::Null,
        }
    }
}

impl From<serde_json::Value> for QueueValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

impl From<OpaqueObject> for QueueValue {
    fn from(object: OpaqueObject) -> Self {
        Self::Object(object)
    }
}

impl From<String> for QueueValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for QueueValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<f64> for QueueValue {
    fn from(number: f64) -> Self {
        Self::Number(number)
    }
}

impl From<f32> for QueueValue {
    fn from(number: f32) -> Self {
        Self::Number(f64::from(number))
    }
}

impl From<i32> for QueueValue {
    fn from(number: i32) -> Self {
        Self::Number(f64::from(number))
    }
}

impl From<u32> for QueueValue {
    fn from(number: u32) -> Self {
        Self::Number(f64::from(number))
    }
}

// Precision beyond 2^53 is lost, matching what the receiver would decode.
impl From<i64> for QueueValue {
    fn from(number: i64) -> Self {
        Self::Number(number as f64)
    }
}

impl From<u64> for QueueValue {
    fn from(number: u64) -> Self {
        Self::Number(number as f64)
    }
}

impl<T: Into<QueueValue>> From<Option<T>> for QueueValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// A Rust value serialized to MessagePack with named fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueObject(Bytes);

impl OpaqueObject {
    /// Serialize a value into an opaque object
    pub fn from_value<T: Serialize>(value: &T) -> Result<Self, EnvelopeError> {
        let bytes = rmp_serde::to_vec_named(value)?;
        Ok(Self(Bytes::from(bytes)))
    }

    /// Wrap received bytes after checking they hold one complete MessagePack value
    pub fn from_bytes(bytes: Bytes) -> Result<Self, EnvelopeError> {
        rmp_serde::from_slice::<IgnoredAny>(&bytes)?;
        Ok(Self(bytes))
    }

    /// Deserialize the object into a concrete type
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        Ok(rmp_serde::from_slice(&self.0)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Encode a value into a tagged payload.
///
/// [`QueueValue::Null`] encodes to an empty payload, which decodes back to
/// `Null` through the missing-tag rule.
pub fn encode(value: &QueueValue) -> Result<Bytes, EnvelopeError> {
    let Some(tag) = value.tag() else {
        return Ok(Bytes::new());
    };

    let body: Bytes = match value {
        QueueValue::Structured(structured) => Bytes::from(serde_json::to_vec(structured)?),
        QueueValue::Object(object) => object.0.clone(),
        QueueValue::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
        QueueValue::Number(number) => Bytes::from(number.to_string()),
        QueueValue::Null => Bytes::new(),
    };

    let mut payload = BytesMut::with_capacity(1 + body.len());
    payload.put_u8(tag.to_byte());
    payload.put_slice(&body);
    Ok(payload.freeze())
}

/// Decode a tagged payload back into a value
pub fn decode(payload: &[u8]) -> Result<QueueValue, EnvelopeError> {
    let Some((&tag_byte, body)) = payload.split_first() else {
        return Ok(QueueValue::Null);
    };

    let Some(tag) = EnvelopeTag::from_byte(tag_byte) else {
        return Ok(QueueValue::Null);
    };

    match tag {
        EnvelopeTag::Structured => Ok(QueueValue::Structured(serde_json::from_slice(body)?)),
        EnvelopeTag::Object => Ok(QueueValue::Object(OpaqueObject::from_bytes(
            Bytes::copy_from_slice(body),
        )?)),
        EnvelopeTag::Text => {
            let text = std::str::from_utf8(body).map_err(|_| EnvelopeError::InvalidUtf8)?;
            Ok(QueueValue::Text(text.to_string()))
        }
        EnvelopeTag::Number => Ok(QueueValue::Number(decode_number(body))),
    }
}

/// Read a numeric body leniently: leading whitespace is skipped and the
/// longest decimal prefix is used, so `"12abc"` is 12. A body without one,
/// including an empty body, is zero.
fn decode_number(body: &[u8]) -> f64 {
    let text = String::from_utf8_lossy(body);
    let text = text.trim_start_matches([' ', '\t', '\n', '\r', '\x0b', '\x0c']);
    numeric_prefix(text).parse::<f64>().unwrap_or(0.0)
}

/// Longest prefix of `text` shaped like `[+-]digits[.digits][(e|E)[+-]digits]`
fn numeric_prefix(text: &str) -> &str {
    let bytes = text.as_bytes();
    let digits_from = |start: usize| {
        bytes[start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }

    let integer_digits = digits_from(end);
    end += integer_digits;

    let mut fraction_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        fraction_digits = digits_from(end + 1);
        end += 1 + fraction_digits;
    }

    if integer_digits + fraction_digits == 0 {
        return "";
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exponent = end + 1;
        if matches!(bytes.get(exponent), Some(b'+' | b'-')) {
            exponent += 1;
        }
        let exponent_digits = digits_from(exponent);
        if exponent_digits > 0 {
            end = exponent + exponent_digits;
        }
    }

    &text[..end]
}
