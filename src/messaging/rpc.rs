//! Correlation-id bookkeeping for request/reply over the broker.
//!
//! One `RpcManager` per node owns the map of in-flight calls. A slot is
//! created on send and destroyed on receipt, timeout or shutdown; resolving an
//! unknown or already-completed id is a no-op.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
pub struct RpcManager {
    pending: DashMap<String, oneshot::Sender<Value>>,
}

impl RpcManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending slot for `correlation_id`.
    ///
    /// Returns `None` when the id is already in use (a caller bug; ids are
    /// freshly generated UUIDs).
    pub fn register(&self, correlation_id: &str) -> Option<oneshot::Receiver<Value>> {
        if self.pending.contains_key(correlation_id) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.to_string(), tx);
        Some(rx)
    }

    /// Deliver a response to the pending slot for `correlation_id`, if any.
    pub fn resolve(&self, correlation_id: &str, response: Value) {
        if let Some((_, tx)) = self.pending.remove(correlation_id) {
            // The waiter may have timed out between remove and send.
            let _ = tx.send(response);
        }
    }

    /// Drop the pending slot for `correlation_id`, if any.
    pub fn cleanup(&self, correlation_id: &str) {
        self.pending.remove(correlation_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_delivers_to_registered_slot() {
        let manager = RpcManager::new();
        let rx = manager.register("abc").unwrap();
        manager.resolve("abc", json!({"ok": true}));
        assert_eq!(rx.await.unwrap(), json!({"ok": true}));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let manager = RpcManager::new();
        let _rx = manager.register("abc").unwrap();
        assert!(manager.register("abc").is_none());
        assert_eq!(manager.pending_count(), 1);
    }

    #[tokio::test]
    async fn cleanup_frees_the_slot_and_resolve_becomes_noop() {
        let manager = RpcManager::new();
        let rx = manager.register("abc").unwrap();
        manager.cleanup("abc");
        assert_eq!(manager.pending_count(), 0);
        manager.resolve("abc", json!(null));
        assert!(rx.await.is_err());
    }
}
