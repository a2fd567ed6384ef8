//! # LineKV Client
//!
//! Purpose: Drive a LineKV server over one TCP connection that carries both
//! command/response traffic and push notifications for subscribed channels.
//!
//! ## Design Principles
//! 1. **Single Reader Task**: One background task frames and classifies every
//!    server line, feeding responses to the correlator and pushes to the
//!    subscription dispatcher.
//! 2. **Positional Correlation**: With no request ids on the wire, commands are
//!    serialized by a lock held from send until response.
//! 3. **Typed Boundary**: `KVClient` turns raw response lines into Rust types.
//! 4. **Local Faults Stay Local**: Bad push lines and panicking callbacks are
//!    logged and skipped; they never reach command callers.

mod client;
mod config;
mod connection;
mod correlator;
mod error;
mod framer;
mod registry;

pub use client::KVClient;
pub use config::{ClientConfig, DEFAULT_READ_BUFFER_CAPACITY};
pub use connection::{Connection, ConnectionState};
pub use error::{CallbackError, ClientError, ClientResult};
pub use framer::{LineFramer, Lines};
pub use registry::{Callback, Dispatch, SubscriptionRegistry};

pub use lkv_common::{DecodeError, KindMap, MessageKind, Payload};
