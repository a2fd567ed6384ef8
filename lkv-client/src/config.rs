//! # Client Configuration
//!
//! `ClientConfig` can be built in code (it implements `Default`) or loaded
//! from TOML:
//!
//! ```toml
//! addr = "127.0.0.1:6379"
//! connect_timeout = "2s"
//! response_timeout = "500ms"
//!
//! [message_kinds]
//! binary = 2
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use lkv_common::KindMap;

use crate::error::{ClientError, ClientResult};

/// Default capacity of the reader's line accumulator.
pub const DEFAULT_READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Configuration for a single connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Optional TCP connect timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    /// Optional bound on how long a command waits for its response.
    ///
    /// When it elapses the connection is closed, since a late response would
    /// otherwise be paired with the next command.
    #[serde(with = "humantime_serde")]
    pub response_timeout: Option<Duration>,
    /// Disable Nagle on the socket.
    pub nodelay: bool,
    /// Initial capacity of the reader's byte accumulator.
    pub read_buffer_capacity: usize,
    /// Push envelope discriminants.
    pub message_kinds: KindMap,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            connect_timeout: None,
            response_timeout: None,
            nodelay: true,
            read_buffer_capacity: DEFAULT_READ_BUFFER_CAPACITY,
            message_kinds: KindMap::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a default configuration pointing at `addr`.
    pub fn with_addr(addr: impl Into<String>) -> Self {
        ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> ClientResult<Self> {
        let config: ClientConfig =
            toml::from_str(text).map_err(|err| ClientError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| ClientError::Config(format!("{}: {}", path.display(), err)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.addr.trim().is_empty() {
            return Err(ClientError::Config("addr must not be empty".to_string()));
        }
        if self.read_buffer_capacity == 0 {
            return Err(ClientError::Config(
                "read_buffer_capacity must be greater than zero".to_string(),
            ));
        }
        self.message_kinds
            .validate()
            .map_err(|err| ClientError::Config(err.to_string()))
    }
}
