//! Pending-call registry: correlation ids and one-shot rendezvous slots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::{ErrorCode, RpcError};

/// The outcome delivered to a parked caller: the peer's result value, the
/// peer's reported error, or `RpcError::ConnectionClosed`.
pub type CallOutcome = Result<Value, RpcError>;

const DEFAULT_MAX_PENDING: usize = 8192;

fn max_pending() -> usize {
    std::env::var("CROSSWIRE_MAX_PENDING")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_PENDING)
}

/// Tracks outstanding locally-initiated calls by correlation id.
///
/// Ids are minted here, monotonically increasing, and never reused while an
/// entry is live. Each entry is a oneshot sender fulfilled exactly once;
/// callers await the paired receiver without holding the registry lock, so
/// one outstanding call never blocks routing of other messages.
pub struct PendingCalls {
    next_id: AtomicU64,
    waiters: Mutex<HashMap<u64, oneshot::Sender<CallOutcome>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh id and register a rendezvous slot for its reply.
    pub fn begin_call(&self) -> Result<(u64, oneshot::Receiver<CallOutcome>), RpcError> {
        let mut waiters = self.waiters.lock();
        let max = max_pending();
        if waiters.len() >= max {
            tracing::warn!(
                pending = waiters.len(),
                max_pending = max,
                "too many outstanding calls; refusing new call"
            );
            return Err(RpcError::Status {
                code: ErrorCode::ResourceExhausted,
                message: "too many outstanding calls".into(),
                data: Value::Null,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        waiters.insert(id, tx);
        tracing::debug!(id, pending = waiters.len(), "registered pending call");
        Ok((id, rx))
    }

    /// Deliver a reply to the matching waiter.
    ///
    /// Returns `false` when no entry exists for `id`; a duplicate or unknown
    /// reply is dropped, not an error, since a hostile or buggy peer can send
    /// replies for ids this side never issued.
    pub fn fulfill(&self, id: u64, outcome: CallOutcome) -> bool {
        let waiter = self.waiters.lock().remove(&id);
        match waiter {
            Some(tx) => {
                tracing::debug!(id, "delivering reply to waiter");
                let _ = tx.send(outcome);
                true
            }
            None => {
                tracing::debug!(id, "reply for unknown call id; dropping");
                false
            }
        }
    }

    /// Remove a waiter without fulfilling it (caller gave up on the reply).
    pub fn discard(&self, id: u64) -> bool {
        self.waiters.lock().remove(&id).is_some()
    }

    /// Fail every outstanding call with a connection-closed outcome.
    pub fn drain_on_close(&self) {
        let drained: Vec<_> = self.waiters.lock().drain().collect();
        for (id, tx) in drained {
            tracing::debug!(id, "failing pending call: connection closed");
            let _ = tx.send(Err(RpcError::ConnectionClosed));
        }
    }

    /// Correlation ids of outstanding calls, sorted (for diagnostics).
    pub fn pending_ids(&self) -> Vec<u64> {
        let waiters = self.waiters.lock();
        let mut ids: Vec<u64> = waiters.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fulfill_delivers_to_the_matching_waiter() {
        let pending = PendingCalls::new();
        let (id_a, rx_a) = pending.begin_call().unwrap();
        let (id_b, rx_b) = pending.begin_call().unwrap();
        assert_ne!(id_a, id_b);

        assert!(pending.fulfill(id_b, Ok(json!("b"))));
        assert!(pending.fulfill(id_a, Ok(json!("a"))));

        assert_eq!(rx_a.await.unwrap().unwrap(), json!("a"));
        assert_eq!(rx_b.await.unwrap().unwrap(), json!("b"));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn unknown_reply_is_inert() {
        let pending = PendingCalls::new();
        let (id, rx) = pending.begin_call().unwrap();

        assert!(!pending.fulfill(id + 100, Ok(json!("ghost"))));
        assert_eq!(pending.pending_ids(), vec![id]);

        assert!(pending.fulfill(id, Ok(json!("real"))));
        assert_eq!(rx.await.unwrap().unwrap(), json!("real"));
    }

    #[tokio::test]
    async fn drain_fails_every_waiter_once() {
        let pending = PendingCalls::new();
        let receivers: Vec<_> = (0..4)
            .map(|_| pending.begin_call().unwrap().1)
            .collect();

        pending.drain_on_close();
        assert!(pending.is_empty());

        for rx in receivers {
            let outcome = rx.await.unwrap();
            assert!(matches!(outcome, Err(RpcError::ConnectionClosed)));
        }
    }

    #[tokio::test]
    async fn discard_removes_the_waiter() {
        let pending = PendingCalls::new();
        let (id, _rx) = pending.begin_call().unwrap();
        assert!(pending.discard(id));
        assert!(!pending.fulfill(id, Ok(json!(1))));
    }

    #[test]
    fn ids_increase_monotonically() {
        let pending = PendingCalls::new();
        let (a, _ra) = pending.begin_call().unwrap();
        let (b, _rb) = pending.begin_call().unwrap();
        let (c, _rc) = pending.begin_call().unwrap();
        assert!(a < b && b < c);
    }
}
