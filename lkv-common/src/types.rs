//! # Push Payload Types
//!
//! Typed values carried by push notifications on subscribed channels.
//!
//! ## Design Principles
//!
//! 1. **Kinds Are Configuration**: Only "binary = 2" is pinned by the wire; the
//!    full discriminant-to-kind table lives in `KindMap` so it can be matched to
//!    the server actually deployed.
//! 2. **Decode at the Boundary**: `Content` is turned into a native `Payload`
//!    once, before any callback sees it.
//! 3. **Lenient Where the Wire Is**: binary content is accepted as a JSON byte
//!    array or as a base64 string; integers as JSON numbers or numeric strings.
//!
//! ## Default Mapping
//!
//! ```text
//! +--------------+---------+
//! | kind         | Type    |
//! +--------------+---------+
//! | String       | 0       |
//! | Integer      | 1       |
//! | Binary       | 2       |
//! | Json         | 3       |
//! | Array        | 4       |
//! +--------------+---------+
//! ```

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DecodeError, DecodeResult};

/// Kind of content carried by a push envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    String,
    Integer,
    Binary,
    Json,
    Array,
}

impl MessageKind {
    /// All kinds, in default discriminant order.
    pub const ALL: [MessageKind; 5] = [
        MessageKind::String,
        MessageKind::Integer,
        MessageKind::Binary,
        MessageKind::Json,
        MessageKind::Array,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::String => "string",
            MessageKind::Integer => "integer",
            MessageKind::Binary => "binary",
            MessageKind::Json => "json",
            MessageKind::Array => "array",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping from envelope `Type` discriminants to message kinds.
///
/// Deserializes from a table such as `{ string = 0, binary = 2, ... }`;
/// omitted entries keep their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KindMap {
    pub string: i64,
    pub integer: i64,
    pub binary: i64,
    pub json: i64,
    pub array: i64,
}

impl Default for KindMap {
    fn default() -> Self {
        KindMap {
            string: 0,
            integer: 1,
            binary: 2,
            json: 3,
            array: 4,
        }
    }
}

impl KindMap {
    /// Returns the discriminant configured for `kind`.
    pub fn discriminant(&self, kind: MessageKind) -> i64 {
        match kind {
            MessageKind::String => self.string,
            MessageKind::Integer => self.integer,
            MessageKind::Binary => self.binary,
            MessageKind::Json => self.json,
            MessageKind::Array => self.array,
        }
    }

    /// Resolves a wire discriminant, or `None` when no kind uses it.
    pub fn resolve(&self, discriminant: i64) -> Option<MessageKind> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| self.discriminant(*kind) == discriminant)
    }

    /// Checks that every kind has its own discriminant.
    pub fn validate(&self) -> DecodeResult<()> {
        for (idx, first) in MessageKind::ALL.iter().enumerate() {
            for second in &MessageKind::ALL[idx + 1..] {
                let discriminant = self.discriminant(*first);
                if discriminant == self.discriminant(*second) {
                    return Err(DecodeError::DuplicateDiscriminant {
                        discriminant,
                        first: *first,
                        second: *second,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Decoded content of a push notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Plain text published with `PUBLISH`.
    Text(String),
    /// Integer published with `PUBLISH_INT`.
    Integer(i64),
    /// Raw bytes published with `PUBLISH_BIN`.
    Binary(Vec<u8>),
    /// Structured document published with `PUBLISH_JSON`.
    Json(Value),
    /// Array published with `PUBLISH_ARRAY`.
    Array(Vec<Value>),
}

impl Payload {
    /// Decodes envelope content according to its kind.
    pub fn decode(kind: MessageKind, content: Value) -> DecodeResult<Self> {
        match kind {
            MessageKind::String => match content {
                Value::String(text) => Ok(Payload::Text(text)),
                other => Err(mismatch(kind, &other)),
            },
            MessageKind::Integer => decode_integer(content).map(Payload::Integer),
            MessageKind::Binary => decode_binary(content).map(Payload::Binary),
            MessageKind::Json => Ok(Payload::Json(content)),
            MessageKind::Array => match content {
                Value::Array(items) => Ok(Payload::Array(items)),
                other => Err(mismatch(kind, &other)),
            },
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Text(_) => MessageKind::String,
            Payload::Integer(_) => MessageKind::Integer,
            Payload::Binary(_) => MessageKind::Binary,
            Payload::Json(_) => MessageKind::Json,
            Payload::Array(_) => MessageKind::Array,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Payload::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Binary(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Payload::Array(items) => Some(items),
            _ => None,
        }
    }
}

fn decode_integer(content: Value) -> DecodeResult<i64> {
    match content {
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| DecodeError::InvalidInteger(number.to_string())),
        Value::String(text) => text
            .trim()
            .parse()
            .map_err(|_| DecodeError::InvalidInteger(text)),
        other => Err(mismatch(MessageKind::Integer, &other)),
    }
}

fn decode_binary(content: Value) -> DecodeResult<Vec<u8>> {
    match content {
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|byte| u8::try_from(byte).ok())
                    .ok_or_else(|| DecodeError::ByteOutOfRange(item.to_string()))
            })
            .collect(),
        Value::String(encoded) => Ok(STANDARD.decode(encoded.as_bytes())?),
        other => Err(mismatch(MessageKind::Binary, &other)),
    }
}

fn mismatch(kind: MessageKind, found: &Value) -> DecodeError {
    DecodeError::ContentMismatch {
        kind,
        found: json_shape(found),
    }
}

fn json_shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
