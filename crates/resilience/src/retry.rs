// crates/resilience/src/retry.rs
//! Error classification and retry with exponential backoff
//!
//! The executor sits inside the circuit breaker boundary: the breaker only
//! sees the outcome of a whole retry sequence.

use crate::error::{CircuitOpenError, TimeoutError};
use crate::timeout::with_timeout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// What went wrong, as far as retry decisions are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Connection reset/refused, DNS failure and the like
    Network,
    /// A deadline elapsed
    Timeout,
    /// Remote answered with this HTTP status
    Status(u16),
    /// Anything else: validation, auth, programming errors
    Other,
}

/// Exposes the shape of an error to the classifier
pub trait Classify {
    /// Describes this error
    fn failure(&self) -> Failure;
}

/// Outcome of classifying an error against a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Likely temporary, eligible for retry
    Transient,
    /// Transient, raised by an attempt deadline
    Timeout,
    /// Propagate immediately
    Fatal,
}

impl ErrorClass {
    /// Returns true for classes the executor retries
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Fatal)
    }
}

impl Classify for std::io::Error {
    fn failure(&self) -> Failure {
        use std::io::ErrorKind;
        match self.kind() {
            ErrorKind::TimedOut => Failure::Timeout,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Failure::Network,
            _ => Failure::Other,
        }
    }
}

impl Classify for TimeoutError {
    fn failure(&self) -> Failure {
        Failure::Timeout
    }
}

impl Classify for CircuitOpenError {
    fn failure(&self) -> Failure {
        Failure::Other
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    max_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    base_delay_ms: u64,
    /// HTTP statuses treated as transient
    retryable_status_codes: BTreeSet<u16>,
    /// Deadline for a single attempt
    attempt_timeout_ms: Option<u64>,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` retries
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Sets the base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = duration_ms(delay);
        self
    }

    /// Replaces the set of retryable HTTP statuses
    pub fn with_retryable_status_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Sets a deadline for each attempt
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Returns the maximum number of retries
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the base delay
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Returns the retryable HTTP statuses
    pub fn retryable_status_codes(&self) -> &BTreeSet<u16> {
        &self.retryable_status_codes
    }

    /// Returns the per-attempt deadline, if any
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }

    /// Delay after the failure of 0-indexed `attempt`: `base * 2^attempt`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// The single place where errors are sorted into transient and fatal
    pub fn classify<E>(&self, error: &E) -> ErrorClass
    where
        E: Classify + ?Sized,
    {
        match error.failure() {
            Failure::Timeout => ErrorClass::Timeout,
            Failure::Network => ErrorClass::Transient,
            Failure::Status(code) if self.retryable_status_codes.contains(&code) => {
                ErrorClass::Transient
            }
            Failure::Status(_) | Failure::Other => ErrorClass::Fatal,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            retryable_status_codes: BTreeSet::from([502, 503, 504]),
            attempt_timeout_ms: None,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Runs a request thunk under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Creates an executor for `policy`
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls `request_fn` until it succeeds, fails fatally, or the retry
    /// budget is spent. The last error is returned as-is.
    pub async fn execute<F, Fut, T, E>(&self, mut request_fn: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + From<TimeoutError> + Display,
    {
        let mut attempt: u32 = 0;

        loop {
            let outcome = match self.policy.attempt_timeout() {
                Some(deadline) => with_timeout(deadline, request_fn())
                    .await
                    .unwrap_or_else(|elapsed| Err(E::from(elapsed))),
                None => request_fn().await,
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        log::debug!("Request succeeded after {} attempts", attempt + 1);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let class = self.policy.classify(&error);
            if !class.is_retryable() {
                log::debug!("Not retrying fatal error: {}", error);
                return Err(error);
            }

            if attempt >= self.policy.max_retries {
                log::warn!(
                    "Retries exhausted after {} attempts, last error: {}",
                    attempt + 1,
                    error
                );
                return Err(error);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            log::debug!(
                "Attempt {} failed ({:?}): {}, retrying in {:?}",
                attempt + 1,
                class,
                error,
                delay
            );
            attempt += 1;
            sleep(delay).await;
        }
    }
}

/// Executes `request_fn` with retry logic
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, request_fn: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + From<TimeoutError> + Display,
{
    RetryExecutor::new(policy.clone()).execute(request_fn).await
}
