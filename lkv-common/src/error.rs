//! # Decode Errors
//!
//! Failures raised while turning protocol lines into typed values. None of
//! these are fatal to a connection: the reader logs and drops the offending
//! line, and typed command calls surface them to their caller.

use thiserror::Error;

use crate::types::MessageKind;

/// Result alias for protocol decoding.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors produced while decoding push notifications or command responses.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The line does not start with the push prefix.
    #[error("line is not a push notification")]
    NotPush,

    /// A push line named a channel but carried no envelope.
    #[error("push notification on channel '{channel}' carries no envelope")]
    MissingEnvelope { channel: String },

    /// A push line carried an empty channel name.
    #[error("push notification has an empty channel name")]
    EmptyChannel,

    /// The envelope is not valid JSON or lacks `Type`/`Content`.
    #[error("malformed push envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    /// The `Type` discriminant is not present in the kind map.
    #[error("unknown message type discriminant {0}")]
    UnknownKind(i64),

    /// `Content` does not have the JSON shape its kind requires.
    #[error("{kind} content has unexpected shape: {found}")]
    ContentMismatch {
        kind: MessageKind,
        found: &'static str,
    },

    /// A binary content element is not an integer in 0..=255.
    #[error("binary content element {0} is not a byte")]
    ByteOutOfRange(String),

    /// Binary content delivered as a string is not valid base64.
    #[error("invalid base64 content: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A response expected to be an integer was not.
    #[error("invalid integer '{0}'")]
    InvalidInteger(String),

    /// Two kinds share the same discriminant in a kind map.
    #[error("discriminant {discriminant} is mapped to both {first} and {second}")]
    DuplicateDiscriminant {
        discriminant: i64,
        first: MessageKind,
        second: MessageKind,
    },
}
