//! # Response Correlator
//!
//! FIFO handoff of response lines from the reader task to the caller that
//! issued the matching command. The protocol has no request ids, so the Nth
//! line queued answers the Nth command sent; the connection's command lock
//! keeps at most one command in flight so that pairing stays correct.
//!
//! The producer side lives in the reader task. When it is dropped (reader
//! exit on close, EOF, or read error), a waiting consumer first drains any
//! lines already queued and then observes `ClientError::ConnectionClosed`.

use tokio::sync::mpsc;

use crate::error::{ClientError, ClientResult};

/// Creates a connected producer/consumer pair.
pub fn response_slot() -> (ResponseSender, ResponseReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ResponseSender { tx }, ResponseReceiver { rx })
}

/// Reader-side handle.
#[derive(Debug)]
pub struct ResponseSender {
    tx: mpsc::UnboundedSender<String>,
}

impl ResponseSender {
    /// Queues a response line.
    ///
    /// Returns false when the consumer is gone and the line was discarded.
    pub fn enqueue(&self, line: String) -> bool {
        self.tx.send(line).is_ok()
    }
}

/// Caller-side handle, owned by the command lock.
#[derive(Debug)]
pub struct ResponseReceiver {
    rx: mpsc::UnboundedReceiver<String>,
}

impl ResponseReceiver {
    /// Waits for the next response line, consuming it.
    pub async fn await_next(&mut self) -> ClientResult<String> {
        self.rx.recv().await.ok_or(ClientError::ConnectionClosed)
    }

    /// Discards responses that arrived without a waiting command.
    pub fn discard_stale(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_enqueue_order() {
        let (tx, mut rx) = response_slot();
        for idx in 0..5 {
            assert!(tx.enqueue(format!("r{}", idx)));
        }
        for idx in 0..5 {
            assert_eq!(rx.await_next().await.unwrap(), format!("r{}", idx));
        }
    }

    #[tokio::test]
    async fn waiter_is_woken_by_late_enqueue() {
        let (tx, mut rx) = response_slot();
        let waiter = tokio::spawn(async move { rx.await_next().await });
        tokio::task::yield_now().await;
        tx.enqueue("OK".to_string());
        assert_eq!(waiter.await.unwrap().unwrap(), "OK");
    }

    #[tokio::test]
    async fn dropping_producer_drains_then_fails() {
        let (tx, mut rx) = response_slot();
        tx.enqueue("last".to_string());
        drop(tx);
        assert_eq!(rx.await_next().await.unwrap(), "last");
        assert!(matches!(
            rx.await_next().await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn pending_waiter_fails_when_producer_drops() {
        let (tx, mut rx) = response_slot();
        let waiter = tokio::spawn(async move { rx.await_next().await });
        tokio::task::yield_now().await;
        drop(tx);
        assert!(matches!(
            waiter.await.unwrap(),
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[test]
    fn enqueue_after_consumer_drop_reports_discard() {
        let (tx, rx) = response_slot();
        drop(rx);
        assert!(!tx.enqueue("OK".to_string()));
    }

    #[test]
    fn discards_stale_lines() {
        let (tx, mut rx) = response_slot();
        tx.enqueue("a".to_string());
        tx.enqueue("b".to_string());
        assert_eq!(rx.discard_stale(), 2);
        assert_eq!(rx.discard_stale(), 0);
    }
}
