//! # Typed Client API
//!
//! Purpose: Expose one method per LineKV verb, decoding each response into the
//! Rust type the verb produces instead of handing raw lines to callers.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides framing, correlation and dispatch.
//! 2. **Decode at the Boundary**: `(nil)` becomes `None`, counts become `i64`,
//!    acknowledgements become `()`.
//! 3. **Fail Fast**: A response of the wrong shape is an error, never a
//!    silently wrong value.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;

use lkv_common::{decode_integer, decode_members, decode_optional, is_ok, quote, Payload};

use crate::config::ClientConfig;
use crate::connection::{ensure_channel, Connection, ConnectionState};
use crate::error::{ClientError, ClientResult};

/// Asynchronous LineKV client over a single connection.
///
/// Calls from concurrent tasks are serialized by the underlying connection.
pub struct KVClient {
    conn: Connection,
}

impl KVClient {
    /// Connects to `addr` with default configuration.
    pub async fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        Self::with_config(ClientConfig::with_addr(addr)).await
    }

    /// Connects with a custom configuration.
    pub async fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let conn = Connection::open(config).await?;
        Ok(KVClient { conn })
    }

    /// Wraps an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        KVClient { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Closes the connection. Safe to call more than once.
    pub async fn close(&self) -> ClientResult<()> {
        self.conn.close().await
    }

    /// Sends a raw command line and returns the raw response.
    pub async fn send(&self, command: &str) -> ClientResult<String> {
        self.conn.send(command).await
    }

    /// Sets a string value. The value is sent quoted so it may contain spaces.
    pub async fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.expect_ok("SET", &[key, &quote(value)]).await
    }

    /// Sets an integer value.
    pub async fn set_int(&self, key: &str, value: i64) -> ClientResult<()> {
        self.expect_ok("SET", &[key, &value.to_string()]).await
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        self.optional("GET", &[key]).await
    }

    /// Pushes values onto the head of a list. Returns the new length.
    pub async fn lpush<V: AsRef<str>>(&self, key: &str, values: &[V]) -> ClientResult<i64> {
        self.push("LPUSH", key, values).await
    }

    /// Pushes values onto the tail of a list. Returns the new length.
    pub async fn rpush<V: AsRef<str>>(&self, key: &str, values: &[V]) -> ClientResult<i64> {
        self.push("RPUSH", key, values).await
    }

    pub async fn lpop(&self, key: &str) -> ClientResult<Option<String>> {
        self.optional("LPOP", &[key]).await
    }

    pub async fn rpop(&self, key: &str) -> ClientResult<Option<String>> {
        self.optional("RPOP", &[key]).await
    }

    /// Adds members to a set. Returns how many were new.
    pub async fn sadd<V: AsRef<str>>(&self, key: &str, members: &[V]) -> ClientResult<i64> {
        self.push("SADD", key, members).await
    }

    /// Lists set members, or `None` when the set does not exist.
    pub async fn smembers(&self, key: &str) -> ClientResult<Option<Vec<String>>> {
        let response = self.conn.execute("SMEMBERS", &[key]).await?;
        Ok(decode_members(&response))
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> ClientResult<()> {
        self.expect_ok("HSET", &[key, field, value]).await
    }

    pub async fn hget(&self, key: &str, field: &str) -> ClientResult<Option<String>> {
        self.optional("HGET", &[key, field]).await
    }

    /// Registers `callback` for `channel` and subscribes on the server.
    ///
    /// Callbacks run on the connection's reader task and must not block.
    pub async fn subscribe<F>(&self, channel: &str, callback: F) -> ClientResult<()>
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.conn.subscribe(channel, callback).await
    }

    /// Publishes plain text.
    pub async fn publish(&self, channel: &str, message: &str) -> ClientResult<()> {
        ensure_channel(channel)?;
        self.expect_ok("PUBLISH", &[channel, message]).await
    }

    /// Publishes any serializable value as a JSON document.
    pub async fn publish_json<T>(&self, channel: &str, data: &T) -> ClientResult<()>
    where
        T: Serialize + ?Sized,
    {
        ensure_channel(channel)?;
        let json = serde_json::to_string(data)?;
        self.expect_ok("PUBLISH_JSON", &[channel, &json]).await
    }

    pub async fn publish_int(&self, channel: &str, number: i64) -> ClientResult<()> {
        ensure_channel(channel)?;
        self.expect_ok("PUBLISH_INT", &[channel, &number.to_string()]).await
    }

    /// Publishes raw bytes, base64 encoded on the wire.
    pub async fn publish_binary(&self, channel: &str, data: &[u8]) -> ClientResult<()> {
        ensure_channel(channel)?;
        let encoded = STANDARD.encode(data);
        self.expect_ok("PUBLISH_BIN", &[channel, &encoded]).await
    }

    /// Publishes a JSON array.
    pub async fn publish_array<T: Serialize>(&self, channel: &str, items: &[T]) -> ClientResult<()> {
        ensure_channel(channel)?;
        let json = serde_json::to_string(items)?;
        self.expect_ok("PUBLISH_ARRAY", &[channel, &json]).await
    }

    async fn expect_ok(&self, command: &'static str, args: &[&str]) -> ClientResult<()> {
        let response = self.conn.execute(command, args).await?;
        if is_ok(&response) {
            Ok(())
        } else {
            Err(ClientError::UnexpectedResponse { command, response })
        }
    }

    async fn optional(&self, command: &'static str, args: &[&str]) -> ClientResult<Option<String>> {
        let response = self.conn.execute(command, args).await?;
        Ok(decode_optional(&response).map(str::to_string))
    }

    async fn push<V: AsRef<str>>(
        &self,
        command: &'static str,
        key: &str,
        values: &[V],
    ) -> ClientResult<i64> {
        if values.is_empty() {
            return Err(ClientError::InvalidCommand(format!(
                "{} requires at least one value",
                command
            )));
        }
        let mut args = Vec::with_capacity(values.len() + 1);
        args.push(key);
        args.extend(values.iter().map(|value| value.as_ref()));

        let response = self.conn.execute(command, &args).await?;
        Ok(decode_integer(&response)?)
    }
}
