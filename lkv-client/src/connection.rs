//! # Connection Lifecycle
//!
//! Purpose: Own the socket, run the background reader, and expose the raw
//! command and subscription primitives every typed call is built on.
//!
//! ## Design Principles
//! 1. **Two Contexts**: One reader task per connection (framer -> classifier
//!    -> correlator | dispatcher) and whichever task issues commands.
//! 2. **One Command In Flight**: The command lock guards the write half and
//!    the response receiver and is held from write until the response
//!    arrives, because responses are matched by position only.
//! 3. **Linear States**: `Disconnected -> Connecting -> Connected -> Closed`.
//!    `Closed` is terminal; reconnecting means building a new `Connection`.
//! 4. **No Silent Hangs**: When the reader stops (close, EOF, read error) the
//!    response producer is dropped, so a waiting command fails with
//!    `ConnectionClosed` instead of blocking forever.
//! 5. **Abandoned Commands Poison**: A `send` dropped between its write and
//!    its response leaves an unclaimed response (or half a line) behind. The
//!    next `send` sees the in-flight flag still set and closes the
//!    connection rather than read someone else's response.
//!
//! ## Structure Overview
//!
//! ```text
//! Connection
//!   ├── shared: Arc<Shared> ──────────────┐ (also held by the reader task)
//!   │     ├── state: Mutex<ConnectionState>
//!   │     ├── registry: SubscriptionRegistry
//!   │     └── kinds: KindMap
//!   ├── command: AsyncMutex<Option<CommandChannel>>
//!   │     ├── writer: OwnedWriteHalf
//!   │     └── responses: ResponseReceiver  <── ResponseSender (reader task)
//!   └── reader: Mutex<Option<ReaderHandle>>
//!         ├── shutdown: oneshot::Sender<()>
//!         └── task: JoinHandle<()>
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lkv_common::{classify, encode_command, is_ok, is_single_line, KindMap, Line, Payload};

use crate::config::ClientConfig;
use crate::correlator::{response_slot, ResponseReceiver, ResponseSender};
use crate::error::{ClientError, ClientResult};
use crate::framer::LineFramer;
use crate::registry::SubscriptionRegistry;

/// Observable lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State shared between the connection handle and its reader task.
struct Shared {
    state: Mutex<ConnectionState>,
    registry: SubscriptionRegistry,
    kinds: KindMap,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Moves `from -> to`; returns false if the state was not `from`.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    /// Moves to `Closed`, returning the state that was left.
    fn mark_closed(&self) -> ConnectionState {
        std::mem::replace(&mut *self.state.lock(), ConnectionState::Closed)
    }
}

/// Caller-side half of the socket, guarded by the command lock.
struct CommandChannel {
    writer: OwnedWriteHalf,
    responses: ResponseReceiver,
    line: String,
    /// Set before the write, cleared once the response is taken.
    in_flight: bool,
}

struct ReaderHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// A single multiplexed connection: command/response plus push notifications.
///
/// All methods take `&self`; wrap the connection in an `Arc` to share it
/// between tasks. Commands from different tasks are serialized.
pub struct Connection {
    config: ClientConfig,
    shared: Arc<Shared>,
    command: AsyncMutex<Option<CommandChannel>>,
    reader: Mutex<Option<ReaderHandle>>,
}

impl Connection {
    /// Creates a connection in the `Disconnected` state.
    pub fn new(config: ClientConfig) -> Self {
        let kinds = config.message_kinds;
        Connection {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Disconnected),
                registry: SubscriptionRegistry::new(),
                kinds,
            }),
            command: AsyncMutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Creates a connection and connects it.
    pub async fn open(config: ClientConfig) -> ClientResult<Self> {
        let conn = Connection::new(config);
        conn.connect().await?;
        Ok(conn)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Channels with at least one registered callback.
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.registry.channels()
    }

    /// Number of callbacks registered for `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.shared.registry.callback_count(channel)
    }

    /// Opens the socket and starts the reader task.
    ///
    /// On failure the connection stays `Disconnected` and may be retried.
    pub async fn connect(&self) -> ClientResult<()> {
        self.config.validate()?;
        if !self
            .shared
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            return Err(ClientError::AlreadyStarted(self.state()));
        }

        let stream = match self.open_stream().await {
            Ok(stream) => stream,
            Err(err) => {
                self.shared
                    .transition(ConnectionState::Connecting, ConnectionState::Disconnected);
                warn!(addr = %self.config.addr, error = %err, "connect failed");
                return Err(err);
            }
        };

        let (read_half, write_half) = stream.into_split();
        let (responses_tx, responses_rx) = response_slot();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        *self.command.lock().await = Some(CommandChannel {
            writer: write_half,
            responses: responses_rx,
            line: String::with_capacity(128),
            in_flight: false,
        });

        let framer = LineFramer::with_capacity(self.config.read_buffer_capacity);
        let task = tokio::spawn(run_reader(
            read_half,
            framer,
            responses_tx,
            self.shared.clone(),
            shutdown_rx,
        ));
        *self.reader.lock() = Some(ReaderHandle {
            shutdown: shutdown_tx,
            task,
        });

        if !self
            .shared
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
        {
            // close() or the reader got there first.
            self.signal_reader();
            return Err(ClientError::ConnectionClosed);
        }

        info!(addr = %self.config.addr, "connected");
        Ok(())
    }

    async fn open_stream(&self) -> ClientResult<TcpStream> {
        let addr = self.config.addr.as_str();
        let result = match self.config.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, TcpStream::connect(addr)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
            },
            None => TcpStream::connect(addr).await,
        };
        let connect_error = |source| ClientError::Connect {
            addr: addr.to_string(),
            source,
        };

        let stream = result.map_err(connect_error)?;
        if self.config.nodelay {
            // Commands are small; do not let Nagle hold them back.
            stream.set_nodelay(true).map_err(connect_error)?;
        }
        Ok(stream)
    }

    /// Sends one raw command line and returns its response line.
    ///
    /// A trailing `\n` is optional. The line is written with a single
    /// `write_all` while the command lock is held, and the lock is kept until
    /// the response arrives. If an earlier `send` was cancelled before its
    /// response arrived, the connection is closed and `ConnectionClosed` is
    /// returned.
    pub async fn send(&self, command: &str) -> ClientResult<String> {
        let line = command.strip_suffix('\n').unwrap_or(command);
        if line.trim().is_empty() || !is_single_line(line) {
            return Err(ClientError::InvalidCommand(line.escape_debug().to_string()));
        }
        self.ensure_connected()?;

        let mut guard = self.command.lock().await;
        // close() may have run while this call waited for the lock.
        self.ensure_connected()?;
        let channel = match guard.as_mut() {
            Some(channel) => channel,
            None => return Err(ClientError::NotConnected(self.state())),
        };
        if channel.in_flight {
            warn!(command = line, "previous command was abandoned mid-flight, closing connection");
            self.poison(&mut guard).await;
            return Err(ClientError::ConnectionClosed);
        }

        let stale = channel.responses.discard_stale();
        if stale > 0 {
            warn!(stale, "discarded responses that had no pending command");
        }

        channel.line.clear();
        channel.line.push_str(line);
        channel.line.push('\n');
        channel.in_flight = true;
        channel.writer.write_all(channel.line.as_bytes()).await?;
        channel.writer.flush().await?;

        let outcome = match self.config.response_timeout {
            Some(limit) => tokio::time::timeout(limit, channel.responses.await_next())
                .await
                .ok(),
            None => Some(channel.responses.await_next().await),
        };
        let response = match outcome {
            Some(response) => {
                channel.in_flight = false;
                response
            }
            None => {
                // A late response would be paired with the next command.
                warn!(command = line, "response timed out, closing connection");
                self.poison(&mut guard).await;
                return Err(ClientError::Timeout);
            }
        };

        match &response {
            Ok(text) => debug!(command = line, response = %text, "command completed"),
            Err(err) => debug!(command = line, error = %err, "command failed"),
        }
        response
    }

    /// Encodes `verb` and `args` as one line and sends it.
    pub async fn execute(&self, verb: &str, args: &[&str]) -> ClientResult<String> {
        let mut line = String::new();
        encode_command(verb, args, &mut line);
        self.send(&line).await
    }

    /// Registers `callback` for `channel` and sends `SUBSCRIBE <channel>`.
    ///
    /// The callback is registered before the command goes out so a message
    /// racing the acknowledgement is not lost. Callbacks run on the reader
    /// task: keep them short and never block in them.
    pub async fn subscribe<F>(&self, channel: &str, callback: F) -> ClientResult<()>
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        ensure_channel(channel)?;
        self.ensure_connected()?;

        self.shared.registry.register(channel, Arc::new(callback));
        let response = self.execute("SUBSCRIBE", &[channel]).await?;
        if is_ok(&response) {
            debug!(channel, "subscribed");
            Ok(())
        } else {
            Err(ClientError::UnexpectedResponse {
                command: "SUBSCRIBE",
                response,
            })
        }
    }

    /// Closes the connection; idempotent.
    ///
    /// Stops the reader, which fails any in-flight command with
    /// `ConnectionClosed`, then shuts the socket down.
    pub async fn close(&self) -> ClientResult<()> {
        let previous = self.shared.mark_closed();

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            let _ = reader.shutdown.send(());
            if let Err(err) = reader.task.await {
                warn!(error = %err, "reader task ended abnormally");
            }
        }

        let channel = self.command.lock().await.take();
        if let Some(mut channel) = channel {
            if let Err(err) = channel.writer.shutdown().await {
                debug!(error = %err, "socket shutdown failed");
            }
        }

        if previous != ConnectionState::Closed {
            info!(addr = %self.config.addr, "connection closed");
        }
        Ok(())
    }

    fn ensure_connected(&self) -> ClientResult<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            state => Err(ClientError::NotConnected(state)),
        }
    }

    /// Closes a connection whose response stream can no longer be trusted.
    async fn poison(&self, command: &mut Option<CommandChannel>) {
        let previous = self.shared.mark_closed();
        debug!(%previous, "connection poisoned");
        self.signal_reader();
        if let Some(mut channel) = command.take() {
            let _ = channel.writer.shutdown().await;
        }
    }

    fn signal_reader(&self) {
        if let Some(reader) = self.reader.lock().take() {
            let _ = reader.shutdown.send(());
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            let _ = reader.shutdown.send(());
        }
    }
}

fn is_valid_channel(channel: &str) -> bool {
    !channel.is_empty() && !channel.chars().any(char::is_whitespace)
}

/// Rejects channel names that would split into several wire arguments.
pub(crate) fn ensure_channel(channel: &str) -> ClientResult<()> {
    if is_valid_channel(channel) {
        Ok(())
    } else {
        Err(ClientError::InvalidChannel(channel.to_string()))
    }
}

/// Reader loop: frame, classify, then hand each line to its sink.
async fn run_reader(
    mut reader: OwnedReadHalf,
    mut framer: LineFramer,
    responses: ResponseSender,
    shared: Arc<Shared>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("reader shutdown requested");
                break;
            }
            read = framer.read_from(&mut reader) => {
                match read {
                    Ok(0) => {
                        debug!(pending = framer.pending(), "server closed the connection");
                        break;
                    }
                    Ok(_) => {
                        for line in framer.lines() {
                            route_line(&line, &responses, &shared);
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "read failed, stopping reader");
                        break;
                    }
                }
            }
        }
    }

    if shared.mark_closed() == ConnectionState::Connected {
        info!("connection closed by peer");
    }
    // Dropping `responses` here wakes any waiting command.
}

fn route_line(line: &str, responses: &ResponseSender, shared: &Shared) {
    match classify(line) {
        Line::Push(rest) => {
            shared.registry.dispatch_line(rest, &shared.kinds);
        }
        Line::Response(response) => {
            if !responses.enqueue(response.to_string()) {
                debug!(response, "response dropped, command side is gone");
            }
        }
    }
}
