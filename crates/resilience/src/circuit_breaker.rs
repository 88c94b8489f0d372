// crates/resilience/src/circuit_breaker.rs
//! Circuit breaker pattern implementation
//!
//! Transitions happen only inside [`CircuitBreaker::execute`]. The open to
//! half-open move is lazy: elapsed time is checked when the next call
//! arrives, so no timer is ever scheduled.

use crate::error::CircuitOpenError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, testing if service recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
///
/// Thresholds below 1 are treated as 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    failure_threshold: u32,
    /// Consecutive half-open successes needed to close
    success_threshold: u32,
    /// Cool-down before a probe is let through
    reset_timeout_ms: u64,
}

impl CircuitBreakerConfig {
    /// Creates a new configuration
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            success_threshold: 2,
            reset_timeout_ms: u64::try_from(reset_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Sets the success threshold
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Returns the failure threshold
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold.max(1)
    }

    /// Returns the success threshold
    pub fn success_threshold(&self) -> u32 {
        self.success_threshold.max(1)
    }

    /// Returns the cool-down duration
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub(crate) fn raw_thresholds(&self) -> (u32, u32) {
        (self.failure_threshold, self.success_threshold)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Cool-down left while open
    pub remaining_open: Option<Duration>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.success_count = 0;
        self.opened_at = Some(now);
    }
}

/// Circuit breaker guarding one logical remote operation
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::named("anonymous", config)
    }

    /// Creates a circuit breaker that reports itself as `name`
    pub fn named(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
        }
    }

    /// Returns the breaker's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Gets the current state
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Gets the consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Gets the consecutive half-open success count
    pub fn success_count(&self) -> u32 {
        self.lock().success_count
    }

    /// Gets a consistent snapshot of all counters
    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.lock();
        let remaining_open = match (state.state, state.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.config
                    .reset_timeout()
                    .saturating_sub(opened_at.elapsed()),
            ),
            _ => None,
        };

        CircuitBreakerStats {
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            remaining_open,
        }
    }

    /// Executes an operation through the circuit breaker
    ///
    /// The operation's error is returned unchanged. While open and cooling
    /// down, the operation is not invoked and a [`CircuitOpenError`] is
    /// returned instead; that rejection is not counted as a failure.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        self.before_call()?;

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                self.on_failure();
                Err(error)
            }
        }
    }

    /// Resets the circuit breaker to closed state
    pub fn reset(&self) {
        *self.lock() = BreakerState::closed();
        log::debug!("Circuit breaker '{}' reset", self.name);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // Every critical section leaves the state consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn before_call(&self) -> Result<(), CircuitOpenError> {
        let mut state = self.lock();
        if state.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = state
            .opened_at
            .map(|opened_at| opened_at.elapsed())
            .unwrap_or_default();
        let reset_timeout = self.config.reset_timeout();

        if elapsed >= reset_timeout {
            state.state = CircuitState::HalfOpen;
            state.success_count = 0;
            state.opened_at = None;
            log::debug!("Circuit breaker '{}' half-open, probing", self.name);
            Ok(())
        } else {
            let remaining_ms = ceil_millis(reset_timeout - elapsed);
            log::debug!(
                "Circuit breaker '{}' open, rejecting call ({}ms left)",
                self.name,
                remaining_ms
            );
            Err(CircuitOpenError { remaining_ms })
        }
    }

    fn on_success(&self) {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold() {
                    *state = BreakerState::closed();
                    log::info!("Circuit breaker '{}' closed, target recovered", self.name);
                }
            }
            // A call admitted before the breaker opened finished late
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut state = self.lock();
        let now = Instant::now();
        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold() {
                    state.open(now);
                    log::warn!(
                        "Circuit breaker '{}' opened after {} consecutive failures",
                        self.name,
                        state.failure_count
                    );
                }
            }
            CircuitState::HalfOpen => {
                state.open(now);
                log::warn!("Circuit breaker '{}' probe failed, reopening", self.name);
            }
            CircuitState::Open => {
                state.failure_count += 1;
            }
        }
    }
}

fn ceil_millis(duration: Duration) -> u64 {
    let whole = duration.as_millis();
    let rounded = if duration > Duration::from_millis(whole as u64) {
        whole + 1
    } else {
        whole
    };
    u64::try_from(rounded).unwrap_or(u64::MAX)
}
