//! # Client Errors
//!
//! Every failure is scoped to a single `Connection`; nothing here is fatal to
//! the process and no retry happens at this layer.

use std::io;

use thiserror::Error;

use lkv_common::DecodeError;

use crate::connection::ConnectionState;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced to callers of the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A command was issued outside the `Connected` state.
    #[error("connection is not connected (state: {0})")]
    NotConnected(ConnectionState),

    /// `connect` was called on a connection that already left `Disconnected`.
    #[error("connection cannot be started from state {0}")]
    AlreadyStarted(ConnectionState),

    /// The connection closed while a response was awaited.
    #[error("connection closed while awaiting a response")]
    ConnectionClosed,

    /// No response arrived within the configured response timeout.
    #[error("timed out waiting for a response")]
    Timeout,

    /// The command cannot be framed as a single protocol line.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Channel names must be non-empty single tokens.
    #[error("invalid channel name '{0}'")]
    InvalidChannel(String),

    /// The server replied with something the command does not produce.
    #[error("unexpected response to {command}: '{response}'")]
    UnexpectedResponse {
        command: &'static str,
        response: String,
    },

    /// A response could not be decoded into the type its command returns,
    /// e.g. a list push answered with something other than an integer.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A payload could not be serialized to JSON.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// Network failure while writing a command.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Configuration could not be loaded or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A subscriber callback panicked while handling a notification.
///
/// Only ever logged: the dispatcher recovers and moves on to the next callback.
#[derive(Debug, Error)]
#[error("callback #{index} for channel '{channel}' panicked: {message}")]
pub struct CallbackError {
    pub channel: String,
    pub index: usize,
    pub message: String,
}
