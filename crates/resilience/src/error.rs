// crates/resilience/src/error.rs
//! Error types for resilience operations

use crate::retry::{Classify, Failure};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for resilience operations
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Raised by a circuit breaker instead of invoking the guarded operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit breaker open, next probe in {remaining_ms}ms")]
pub struct CircuitOpenError {
    /// Milliseconds until the breaker lets a probe through
    pub remaining_ms: u64,
}

impl CircuitOpenError {
    /// Time left in the cool-down
    pub fn remaining(&self) -> Duration {
        Duration::from_millis(self.remaining_ms)
    }
}

/// Raised when a single attempt exceeds its deadline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Operation timed out after {after:?}")]
pub struct TimeoutError {
    /// The deadline that elapsed
    pub after: Duration,
}

/// General purpose error for integrations without an error type of their own
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Connection-level failure (reset, refused, DNS, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// Remote answered with a non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Attempt deadline elapsed
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// Circuit breaker rejected the call
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Request rejected by the remote as invalid
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

impl ResilienceError {
    /// Builds a status error
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Returns the HTTP status carried by this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ResilienceError {
    fn from(err: std::io::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl Classify for ResilienceError {
    fn failure(&self) -> Failure {
        match self {
            Self::Network(_) => Failure::Network,
            Self::Status { status, .. } => Failure::Status(*status),
            Self::Timeout(_) => Failure::Timeout,
            Self::CircuitOpen(_) | Self::Validation(_) | Self::Custom(_) => Failure::Other,
        }
    }
}

/// A single invalid configuration value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl ValidationError {
    /// Creates a new validation error
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading resilience configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse config file
    #[error("Failed to parse resilience config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Config contains invalid values
    #[error("Config validation failed: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_message() {
        let err = CircuitOpenError { remaining_ms: 4200 };
        assert!(err.to_string().starts_with("Circuit breaker open"));
        assert!(err.to_string().contains("4200ms"));
        assert_eq!(err.remaining(), Duration::from_millis(4200));
    }

    #[test]
    fn test_circuit_open_surfaces_verbatim() {
        let err: ResilienceError = CircuitOpenError { remaining_ms: 10 }.into();
        assert_eq!(err.to_string(), "Circuit breaker open, next probe in 10ms");
    }

    #[test]
    fn test_timeout_error() {
        let err = TimeoutError {
            after: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("timed out"));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn test_status_error() {
        let err = ResilienceError::status(503, "Service Unavailable");
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");
        assert_eq!(err.failure(), Failure::Status(503));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = ResilienceError::from(io);
        assert!(matches!(err, ResilienceError::Network(_)));
        assert_eq!(err.failure(), Failure::Network);
    }

    #[test]
    fn test_config_invalid_lists_every_field() {
        let err = ConfigError::Invalid(vec![
            ValidationError::new("limiter.concurrency", "must be at least 1"),
            ValidationError::new("retry.max_retries", "must be at most 20"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("limiter.concurrency"));
        assert!(msg.contains("retry.max_retries"));
    }
}
