//! # Subscription Registry & Dispatcher
//!
//! Purpose: Map channel names to the callbacks registered for them and fan
//! decoded push notifications out to those callbacks.
//!
//! ## Design Principles
//! 1. **Append-Only**: There is no unsubscribe; a channel's callback list only
//!    grows, in registration order, duplicates allowed.
//! 2. **Lock Scope**: The map lock is held to look up or append, never while
//!    user code runs; callbacks are cloned out as `Arc`s first.
//! 3. **Fault Isolation**: A malformed envelope or a panicking callback is
//!    logged and skipped. The reader loop never sees either.
//!
//! ## Notes
//! - Dispatch runs on the reader task. A slow callback delays every line
//!   behind it, command responses included, so callbacks must be quick and
//!   hand long work to another task themselves.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use lkv_common::{KindMap, Payload, PushNotification};

use crate::error::CallbackError;

/// Shared handle to a subscriber callback.
pub type Callback = Arc<dyn Fn(&Payload) + Send + Sync + 'static>;

/// Outcome of dispatching one push line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Every registered callback was invoked; `failed` of them panicked.
    Delivered { callbacks: usize, failed: usize },
    /// No callback is registered for the channel.
    NoSubscribers,
    /// The line could not be decoded and was dropped.
    Malformed,
}

/// Channel name to ordered callback list.
#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: RwLock<HashMap<String, Vec<Callback>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `callback` to the channel's list, creating it if absent.
    pub fn register(&self, channel: &str, callback: Callback) {
        let mut channels = self.channels.write();
        channels
            .entry_ref(channel)
            .or_insert_with(Vec::new)
            .push(callback);
    }

    /// Number of callbacks registered for `channel`.
    pub fn callback_count(&self, channel: &str) -> usize {
        self.channels.read().get(channel).map_or(0, Vec::len)
    }

    /// Channels with at least one callback.
    pub fn channels(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    fn callbacks(&self, channel: &str) -> Option<Vec<Callback>> {
        self.channels.read().get(channel).cloned()
    }

    /// Decodes the text after `Message ` and invokes the channel's callbacks.
    pub fn dispatch_line(&self, rest: &str, kinds: &KindMap) -> Dispatch {
        let push = match PushNotification::parse(rest) {
            Ok(push) => push,
            Err(err) => {
                warn!(error = %err, "dropping malformed push notification");
                return Dispatch::Malformed;
            }
        };
        self.dispatch(push, kinds)
    }

    /// Invokes every callback for the notification's channel, in order.
    pub fn dispatch(&self, push: PushNotification, kinds: &KindMap) -> Dispatch {
        let callbacks = match self.callbacks(&push.channel) {
            Some(callbacks) => callbacks,
            None => {
                debug!(channel = %push.channel, "no subscribers, dropping notification");
                return Dispatch::NoSubscribers;
            }
        };

        let channel = push.channel.clone();
        let payload = match push.decode(kinds) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(channel = %channel, error = %err, "dropping undecodable push payload");
                return Dispatch::Malformed;
            }
        };

        let mut failed = 0;
        for (index, callback) in callbacks.iter().enumerate() {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(&payload))) {
                failed += 1;
                let err = CallbackError {
                    channel: channel.clone(),
                    index,
                    message: panic_message(panic.as_ref()),
                };
                warn!(error = %err, "subscriber callback failed");
            }
        }

        Dispatch::Delivered {
            callbacks: callbacks.len(),
            failed,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
