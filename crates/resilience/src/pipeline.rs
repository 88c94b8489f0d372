// crates/resilience/src/pipeline.rs
//! One integration's full call path: idempotency check, breaker, retry

use crate::circuit_breaker::CircuitBreaker;
use crate::config::ResilienceConfig;
use crate::error::{CircuitOpenError, TimeoutError};
use crate::idempotency::{IdempotencyStore, IdempotentResult, StoredOutcome};
use crate::registry::BreakerRegistry;
use crate::retry::{Classify, RetryExecutor, RetryPolicy};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

/// A remote target guarded by its registry breaker and retry policy
#[derive(Debug, Clone)]
pub struct Integration {
    breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
}

impl Integration {
    /// Combines an existing breaker with a retry policy
    pub fn new(breaker: Arc<CircuitBreaker>, policy: RetryPolicy) -> Self {
        Self {
            breaker,
            retry: RetryExecutor::new(policy),
        }
    }

    /// Looks up the breaker for `key` and the retry policy configured for it
    pub fn from_registry(registry: &BreakerRegistry, config: &ResilienceConfig, key: &str) -> Self {
        Self::new(registry.get(key), config.retry_policy_for(key))
    }

    /// Returns the breaker key
    pub fn key(&self) -> &str {
        self.breaker.name()
    }

    /// Returns the breaker guarding this integration
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Returns the retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        self.retry.policy()
    }

    /// Runs `request_fn` with retries, the whole retry sequence counting as
    /// a single breaker outcome.
    pub async fn call<F, Fut, T, E>(&self, request_fn: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + From<TimeoutError> + From<CircuitOpenError> + Display,
    {
        self.breaker.execute(|| self.retry.execute(request_fn)).await
    }

    /// Like [`Integration::call`], but returns the stored outcome when the
    /// `(operation_id, caller_key)` write already completed.
    pub async fn write<F, Fut, E>(
        &self,
        store: &IdempotencyStore,
        operation_id: &str,
        caller_key: &str,
        request_fn: F,
    ) -> Result<IdempotentResult, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<StoredOutcome, E>>,
        E: Classify + From<TimeoutError> + From<CircuitOpenError> + Display,
    {
        store
            .with_idempotency(operation_id, caller_key, || self.call(request_fn))
            .await
    }
}
