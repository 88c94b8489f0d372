// crates/resilience/src/idempotency.rs
//! At-most-once results for write operations
//!
//! Results are keyed by `(operation_id, caller_key)`, so the same caller
//! token used for two different operations never collides. Entries live
//! until [`IdempotencyStore::clear`] or the end of the process.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;

/// Outcome of a completed write, as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOutcome {
    pub status: String,
    pub data: Value,
}

impl StoredOutcome {
    pub fn new(status: impl Into<String>, data: Value) -> Self {
        Self {
            status: status.into(),
            data,
        }
    }
}

/// What [`IdempotencyStore::with_idempotency`] hands back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotentResult {
    /// True when the stored result was returned without computing
    pub deduplicated: bool,
    pub status: String,
    pub data: Value,
}

impl IdempotentResult {
    fn from_outcome(outcome: StoredOutcome, deduplicated: bool) -> Self {
        Self {
            deduplicated,
            status: outcome.status,
            data: outcome.data,
        }
    }
}

type EntryKey = (String, String);
type Slot = Arc<OnceCell<StoredOutcome>>;

/// Map from `(operation_id, caller_key)` to a completed outcome
#[derive(Debug, Default)]
pub struct IdempotencyStore {
    entries: Mutex<HashMap<EntryKey, Slot>>,
}

impl IdempotencyStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored outcome for the pair, or runs `compute` and stores
    /// what it returns.
    ///
    /// A failed `compute` stores nothing, so the next call computes again.
    /// Calls racing on the same pair share one `compute`. An empty
    /// `caller_key` opts out: `compute` runs and nothing is stored.
    pub async fn with_idempotency<F, Fut, E>(
        &self,
        operation_id: &str,
        caller_key: &str,
        compute: F,
    ) -> Result<IdempotentResult, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StoredOutcome, E>>,
    {
        if caller_key.is_empty() {
            let outcome = compute().await?;
            return Ok(IdempotentResult::from_outcome(outcome, false));
        }

        let key = (operation_id.to_string(), caller_key.to_string());
        let slot = Arc::clone(self.lock().entry(key.clone()).or_default());

        let mut computed = false;
        let outcome = match slot
            .get_or_try_init(|| {
                computed = true;
                compute()
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                self.discard_empty(&key, &slot);
                return Err(error);
            }
        };

        if !computed {
            log::debug!(
                "Idempotency hit for {} (key {}), returning stored result",
                operation_id,
                caller_key
            );
        }

        Ok(IdempotentResult::from_outcome(outcome.clone(), !computed))
    }

    /// Returns true if a completed outcome is stored for the pair
    pub fn contains(&self, operation_id: &str, caller_key: &str) -> bool {
        self.lock()
            .get(&(operation_id.to_string(), caller_key.to_string()))
            .is_some_and(|slot| slot.initialized())
    }

    /// Returns the number of stored outcomes
    pub fn len(&self) -> usize {
        self.lock().values().filter(|slot| slot.initialized()).count()
    }

    /// Returns true if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every stored outcome
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Removes `slot` after a failed compute unless another caller still
    /// waits on it or it has been replaced.
    fn discard_empty(&self, key: &EntryKey, slot: &Slot) {
        let mut entries = self.lock();
        let removable = entries.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && !current.initialized() && Arc::strong_count(slot) == 2
        });
        if removable {
            entries.remove(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntryKey, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResilienceError;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn create_shipment(
        store: &IdempotencyStore,
        operation: &str,
        key: &str,
        calls: &AtomicU32,
    ) -> Result<IdempotentResult, ResilienceError> {
        store
            .with_idempotency(operation, key, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(StoredOutcome::new("created", json!({ "shipment": n })))
            })
            .await
    }

    #[tokio::test]
    async fn test_second_call_is_deduplicated() {
        let store = IdempotencyStore::new();
        let calls = AtomicU32::new(0);

        let first = create_shipment(&store, "dhl_create_shipment", "K", &calls)
            .await
            .expect("first call");
        let second = create_shipment(&store, "dhl_create_shipment", "K", &calls)
            .await
            .expect("second call");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.status, second.status);
        assert_eq!(first.data, second.data);
        assert!(store.contains("dhl_create_shipment", "K"));
    }

    #[tokio::test]
    async fn test_operations_have_separate_keyspaces() {
        let store = IdempotencyStore::new();
        let create_calls = AtomicU32::new(0);
        let cancel_calls = AtomicU32::new(0);

        let created = create_shipment(&store, "dhl_create_shipment", "K", &create_calls)
            .await
            .expect("create");
        let cancelled = create_shipment(&store, "dhl_cancel_shipment", "K", &cancel_calls)
            .await
            .expect("cancel");

        assert_eq!(create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cancel_calls.load(Ordering::SeqCst), 1);
        assert!(!created.deduplicated);
        assert!(!cancelled.deduplicated);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_compute_is_not_stored() {
        let store = IdempotencyStore::new();
        let calls = AtomicU32::new(0);

        let failed: Result<IdempotentResult, ResilienceError> = store
            .with_idempotency("shopify_release_hold", "order-1", || async {
                Err(ResilienceError::status(503, "unavailable"))
            })
            .await;
        assert!(failed.is_err());
        assert!(!store.contains("shopify_release_hold", "order-1"));
        assert!(store.is_empty());

        let retried = create_shipment(&store, "shopify_release_hold", "order-1", &calls)
            .await
            .expect("retry");
        assert!(!retried.deduplicated);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_computes_leave_no_entries() {
        let store = IdempotencyStore::new();

        for order in 0..100 {
            let result: Result<IdempotentResult, ResilienceError> = store
                .with_idempotency("dhl_create_shipment", &order.to_string(), || async {
                    Err(ResilienceError::status(503, "unavailable"))
                })
                .await;
            assert!(result.is_err());
        }

        assert!(store.is_empty());
        assert_eq!(store.lock().len(), 0);
    }

    #[tokio::test]
    async fn test_waiter_survives_failed_first_compute() {
        let store = IdempotencyStore::new();
        let calls = AtomicU32::new(0);

        let failing = store.with_idempotency("dhl_create_shipment", "K", || async {
            tokio::task::yield_now().await;
            Err::<StoredOutcome, _>(ResilienceError::Network("reset".into()))
        });
        let waiting = create_shipment(&store, "dhl_create_shipment", "K", &calls);

        let (failed, waited) = tokio::join!(failing, waiting);

        assert!(failed.is_err());
        let waited = waited.expect("waiter computes after the failure");
        assert!(!waited.deduplicated);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.contains("dhl_create_shipment", "K"));
        assert_eq!(store.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_calls_compute_once() {
        let store = IdempotencyStore::new();
        let calls = AtomicU32::new(0);

        let slow = store.with_idempotency("dhl_create_shipment", "K", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok::<_, ResilienceError>(StoredOutcome::new("created", json!(1)))
        });
        let fast = create_shipment(&store, "dhl_create_shipment", "K", &calls);

        let (a, b) = tokio::join!(slow, fast);
        let (a, b) = (a.expect("slow"), b.expect("fast"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!a.deduplicated);
        assert!(b.deduplicated);
        assert_eq!(b.data, json!(1));
    }

    #[tokio::test]
    async fn test_empty_key_skips_dedup() {
        let store = IdempotencyStore::new();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let result = create_shipment(&store, "dhl_create_shipment", "", &calls)
                .await
                .expect("call");
            assert!(!result.deduplicated);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_clear_forgets_outcomes() {
        let store = IdempotencyStore::new();
        let calls = AtomicU32::new(0);

        let _ = create_shipment(&store, "dhl_create_shipment", "K", &calls).await;
        store.clear();
        let again = create_shipment(&store, "dhl_create_shipment", "K", &calls)
            .await
            .expect("after clear");

        assert!(!again.deduplicated);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
