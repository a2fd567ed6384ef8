//! # Line Protocol
//!
//! Purpose: Classify server lines, decode push envelopes, and encode/decode
//! the plain command lines of the LineKV wire format.
//!
//! ## Design Principles
//!
//! 1. **One Line, One Sink**: Every framed line is either a push notification
//!    or a command response, never both.
//! 2. **Positional Responses**: Responses carry no request id; their meaning
//!    depends on the command that produced them, so typed decoding happens at
//!    the call site through the helpers below.
//! 3. **Borrow First**: Classification borrows from the framed line; only
//!    envelope decoding allocates.
//!
//! ## Wire Format
//!
//! ```text
//! command:  <VERB> <arg> <arg> ...\n
//! response: OK | (nil) | <scalar> | <integer> | <token> <token> ...\n
//! push:     Message <channel> {"Type": <int>, "Content": <value>}\n
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DecodeError, DecodeResult};
use crate::types::{KindMap, Payload};

/// Prefix that marks a line as a push notification.
pub const PUSH_PREFIX: &str = "Message ";

/// Acknowledgement token.
pub const OK: &str = "OK";

/// Marker for a missing key, field, or element.
pub const NIL: &str = "(nil)";

/// Result of classifying one framed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    /// A push notification; holds everything after the prefix.
    Push(&'a str),
    /// A command response with trailing whitespace removed.
    Response(&'a str),
}

/// Routes a framed line to the push path or the response path.
pub fn classify(line: &str) -> Line<'_> {
    match line.strip_prefix(PUSH_PREFIX) {
        Some(rest) => Line::Push(rest),
        None => Line::Response(line.trim_end()),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "Type")]
    kind: i64,
    #[serde(rename = "Content")]
    content: Value,
}

/// A push notification whose envelope has been parsed but whose content has
/// not yet been mapped to a `Payload`.
#[derive(Debug, Clone, PartialEq)]
pub struct PushNotification {
    pub channel: String,
    pub discriminant: i64,
    pub content: Value,
}

impl PushNotification {
    /// Parses the text following `Message ` on a push line.
    pub fn parse(rest: &str) -> DecodeResult<Self> {
        let (channel, envelope) = rest.split_once(' ').unwrap_or((rest, ""));
        if channel.is_empty() {
            return Err(DecodeError::EmptyChannel);
        }
        if envelope.trim().is_empty() {
            return Err(DecodeError::MissingEnvelope {
                channel: channel.to_string(),
            });
        }

        let envelope: Envelope = serde_json::from_str(envelope)?;
        Ok(PushNotification {
            channel: channel.to_string(),
            discriminant: envelope.kind,
            content: envelope.content,
        })
    }

    /// Parses a complete push line, prefix included.
    pub fn parse_line(line: &str) -> DecodeResult<Self> {
        match classify(line) {
            Line::Push(rest) => Self::parse(rest),
            Line::Response(_) => Err(DecodeError::NotPush),
        }
    }

    /// Maps the content to a native payload using `kinds`.
    pub fn decode(self, kinds: &KindMap) -> DecodeResult<Payload> {
        let kind = kinds
            .resolve(self.discriminant)
            .ok_or(DecodeError::UnknownKind(self.discriminant))?;
        Payload::decode(kind, self.content)
    }

    /// Renders the notification as a wire line, without the trailing newline.
    pub fn to_line(&self) -> DecodeResult<String> {
        let envelope = serde_json::to_string(&Envelope {
            kind: self.discriminant,
            content: self.content.clone(),
        })?;
        Ok(format!("{}{} {}", PUSH_PREFIX, self.channel, envelope))
    }
}

/// Returns true when `text` can travel inside one protocol line.
pub fn is_single_line(text: &str) -> bool {
    !text.contains(['\n', '\r'])
}

/// Encodes a command line into `out`, terminating newline included.
pub fn encode_command(verb: &str, args: &[&str], out: &mut String) {
    out.push_str(verb);
    for arg in args {
        out.push(' ');
        out.push_str(arg);
    }
    out.push('\n');
}

/// Wraps a string value in double quotes, as `SET` expects for text.
pub fn quote(value: &str) -> String {
    format!("\"{}\"", value)
}

/// True when the response is the acknowledgement token.
pub fn is_ok(response: &str) -> bool {
    response == OK
}

/// Maps `(nil)` to `None`; any other response is the value itself.
pub fn decode_optional(response: &str) -> Option<&str> {
    if response == NIL {
        None
    } else {
        Some(response)
    }
}

/// Parses an integer response such as the new length after `LPUSH`.
pub fn decode_integer(response: &str) -> DecodeResult<i64> {
    response
        .trim()
        .parse()
        .map_err(|_| DecodeError::InvalidInteger(response.to_string()))
}

/// Splits a whitespace-delimited member list; `(nil)` maps to `None`.
pub fn decode_members(response: &str) -> Option<Vec<String>> {
    decode_optional(response).map(|list| list.split_whitespace().map(str::to_string).collect())
}
