// crates/resilience/src/lib.rs
//! Resilience core for outbound integration calls
//!
//! This crate provides:
//! - A concurrency [`Limiter`] with FIFO queueing
//! - A per-target [`CircuitBreaker`] and the keyed [`BreakerRegistry`]
//! - A [`RetryExecutor`] that classifies errors and backs off exponentially
//! - An [`IdempotencyStore`] giving write operations at-most-once results
//!
//! The usual call path for a write is idempotency check, then breaker, then
//! retry, with [`Integration`] wiring the three together.
//!
//! # Example
//!
//! ```rust
//! use shipdesk_resilience::{
//!     BreakerRegistry, CircuitBreakerConfig, Integration, ResilienceError, RetryPolicy,
//! };
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), ResilienceError> {
//! let registry = BreakerRegistry::new(CircuitBreakerConfig::new(5, Duration::from_secs(30)));
//! let dhl = Integration::new(
//!     registry.get("dhl"),
//!     RetryPolicy::new(3).with_base_delay(Duration::from_millis(200)),
//! );
//!
//! let label = dhl
//!     .call(|| async { Ok::<_, ResilienceError>("label.pdf") })
//!     .await?;
//! assert_eq!(label, "label.pdf");
//! # Ok(())
//! # }
//! ```

mod circuit_breaker;
mod config;
mod error;
mod idempotency;
mod limiter;
mod pipeline;
mod registry;
mod retry;
mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use config::{IntegrationConfig, ResilienceConfig, MAX_RETRIES_LIMIT};
pub use error::{
    CircuitOpenError, ConfigError, ConfigResult, ResilienceError, ResilienceResult, TimeoutError,
    ValidationError,
};
pub use idempotency::{IdempotencyStore, IdempotentResult, StoredOutcome};
pub use limiter::{Limiter, LimiterConfig};
pub use pipeline::Integration;
pub use registry::BreakerRegistry;
pub use retry::{with_retry, Classify, ErrorClass, Failure, RetryExecutor, RetryPolicy};
pub use timeout::with_timeout;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_exports_accessible() {
        let _: RetryPolicy = RetryPolicy::default();
        let _: RetryExecutor = RetryExecutor::default();
        let _: CircuitBreakerConfig = CircuitBreakerConfig::default();
        let _: CircuitBreaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        let _: BreakerRegistry = BreakerRegistry::default();
        let _: Limiter = Limiter::new(2);
        let _: IdempotencyStore = IdempotencyStore::new();
        let _: ResilienceConfig = ResilienceConfig::default();
    }
}
