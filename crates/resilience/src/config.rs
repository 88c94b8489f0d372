// crates/resilience/src/config.rs
//! Resilience configuration
//!
//! Every record fills missing fields from its defaults, so a TOML file only
//! needs the values it changes:
//!
//! ```toml
//! [limiter]
//! concurrency = 4
//!
//! [breaker]
//! failure_threshold = 5
//! reset_timeout_ms = 30000
//!
//! [retry]
//! max_retries = 3
//! retryable_status_codes = [502, 503, 504]
//!
//! [integrations.dhl.retry]
//! max_retries = 5
//! ```

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{ConfigError, ConfigResult, ValidationError};
use crate::limiter::LimiterConfig;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Upper bound on `max_retries` accepted by validation
pub const MAX_RETRIES_LIMIT: u32 = 20;

/// Per-integration overrides; unset sections fall back to the defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    pub breaker: Option<CircuitBreakerConfig>,
    pub retry: Option<RetryPolicy>,
}

/// Root resilience configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Batch concurrency
    pub limiter: LimiterConfig,

    /// Default breaker settings
    pub breaker: CircuitBreakerConfig,

    /// Default retry policy
    pub retry: RetryPolicy,

    /// Overrides keyed by integration (breaker key)
    pub integrations: BTreeMap<String, IntegrationConfig>,
}

impl ResilienceConfig {
    /// Parses and validates a TOML document
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        log::debug!(
            "Loaded resilience config from {} ({} integrations)",
            path.display(),
            config.integrations.len()
        );
        Ok(config)
    }

    /// Breaker settings for `key`
    pub fn breaker_config_for(&self, key: &str) -> CircuitBreakerConfig {
        self.integrations
            .get(key)
            .and_then(|integration| integration.breaker.clone())
            .unwrap_or_else(|| self.breaker.clone())
    }

    /// Retry policy for `key`
    pub fn retry_policy_for(&self, key: &str) -> RetryPolicy {
        self.integrations
            .get(key)
            .and_then(|integration| integration.retry.clone())
            .unwrap_or_else(|| self.retry.clone())
    }

    /// Validates the whole configuration, returning every problem found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.limiter.concurrency < 1 {
            errors.push(ValidationError::new("limiter.concurrency", "must be at least 1"));
        }

        validate_breaker(&self.breaker, "breaker", &mut errors);
        validate_retry(&self.retry, "retry", &mut errors);

        for (key, integration) in &self.integrations {
            if key.trim().is_empty() {
                errors.push(ValidationError::new("integrations", "key must not be empty"));
            }
            if let Some(breaker) = &integration.breaker {
                validate_breaker(breaker, &format!("integrations.{}.breaker", key), &mut errors);
            }
            if let Some(retry) = &integration.retry {
                validate_retry(retry, &format!("integrations.{}.retry", key), &mut errors);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn validate_breaker(
    config: &CircuitBreakerConfig,
    section: &str,
    errors: &mut Vec<ValidationError>,
) {
    let (failure_threshold, success_threshold) = config.raw_thresholds();
    if failure_threshold < 1 {
        errors.push(ValidationError::new(
            format!("{}.failure_threshold", section),
            "must be at least 1",
        ));
    }
    if success_threshold < 1 {
        errors.push(ValidationError::new(
            format!("{}.success_threshold", section),
            "must be at least 1",
        ));
    }
}

fn validate_retry(policy: &RetryPolicy, section: &str, errors: &mut Vec<ValidationError>) {
    if policy.max_retries() > MAX_RETRIES_LIMIT {
        errors.push(ValidationError::new(
            format!("{}.max_retries", section),
            format!("must be at most {}", MAX_RETRIES_LIMIT),
        ));
    }
    if let Some(code) = policy
        .retryable_status_codes()
        .iter()
        .find(|code| !(100..=599).contains(*code))
    {
        errors.push(ValidationError::new(
            format!("{}.retryable_status_codes", section),
            format!("{} is not an HTTP status", code),
        ));
    }
    if policy.attempt_timeout().is_some_and(|t| t.is_zero()) {
        errors.push(ValidationError::new(
            format!("{}.attempt_timeout_ms", section),
            "must be greater than 0",
        ));
    }
}
