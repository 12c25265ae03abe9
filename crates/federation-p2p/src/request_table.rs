//! `RequestTable`: per-request end-to-end correlation for P2P request/reply,
//! grounded on spec §4.3's closing paragraph. Retries are the caller's
//! responsibility; this table only tracks "is a reply still expected for
//! this message id" and wakes the waiter exactly once.

use bytes::Bytes;
use dashmap::DashMap;
use federation_core::error::ErrorCode;
use federation_core::{FederationError, Result};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::trace;

pub struct RequestTable {
    pending: DashMap<u64, oneshot::Sender<Bytes>>,
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTable {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Registers `message_id` as awaiting a reply, then suspends until
    /// either the reply arrives via [`complete`](Self::complete), `timeout`
    /// elapses, or [`cancel`](Self::cancel) fires (`OperationCanceled`).
    pub async fn await_reply(&self, message_id: u64, request_timeout: Duration) -> Result<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(message_id, tx);
        let outcome = timeout(request_timeout, rx).await;
        self.pending.remove(&message_id);
        match outcome {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(FederationError::new(
                ErrorCode::OperationCanceled,
                "request was canceled before a reply arrived",
            )),
            Err(_) => Err(FederationError::new(
                ErrorCode::Timeout,
                format!("no reply for message {message_id} within {request_timeout:?}"),
            )),
        }
    }

    /// Delivers a reply to whoever is awaiting `message_id`. A no-op if
    /// nobody is waiting (the request already timed out or was canceled) —
    /// an in-flight transport callback firing after the context is gone
    /// must not be treated as an error.
    pub fn complete(&self, message_id: u64, payload: Bytes) {
        if let Some((_, sender)) = self.pending.remove(&message_id) {
            let _ = sender.send(payload);
        } else {
            trace!(message_id, "reply arrived for an unknown or already-resolved request");
        }
    }

    /// Cooperatively cancels a pending request: the waiter wakes with
    /// `OperationCanceled` and the table entry is purged.
    pub fn cancel(&self, message_id: u64) {
        self.pending.remove(&message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_resolves_the_waiting_request() {
        let table = RequestTable::new();
        let table = std::sync::Arc::new(table);
        let waiter = {
            let table = table.clone();
            tokio::spawn(async move { table.await_reply(1, Duration::from_millis(500)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        table.complete(1, Bytes::from_static(b"pong"));
        let reply = waiter.await.unwrap().unwrap();
        assert_eq!(reply, Bytes::from_static(b"pong"));
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let table = RequestTable::new();
        let err = table.await_reply(2, Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_wakes_the_waiter_with_operation_canceled() {
        let table = std::sync::Arc::new(RequestTable::new());
        let waiter = {
            let table = table.clone();
            tokio::spawn(async move { table.await_reply(3, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        table.cancel(3);
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperationCanceled);
    }

    #[tokio::test]
    async fn reply_to_unknown_request_is_a_silent_no_op() {
        let table = RequestTable::new();
        table.complete(999, Bytes::from_static(b"stray"));
    }
}
