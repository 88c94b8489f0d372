// crates/resilience/src/registry.rs
//! Keyed pool of circuit breakers
//!
//! One breaker per remote target, so one vendor being down never opens the
//! breaker of another.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::ResilienceConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lazily populated map from breaker key to breaker
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Creates an empty registry whose breakers default to `defaults`
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a registry using the breaker defaults and per-integration
    /// overrides from `config`
    pub fn from_config(config: &ResilienceConfig) -> Self {
        let overrides = config
            .integrations
            .iter()
            .filter_map(|(key, integration)| {
                integration
                    .breaker
                    .clone()
                    .map(|breaker| (key.clone(), breaker))
            })
            .collect();

        Self {
            defaults: config.breaker.clone(),
            overrides,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `key`, creating it on first lookup.
    ///
    /// `config` is only consulted when the breaker is created; later lookups
    /// return the existing instance whatever config they pass.
    pub fn get_circuit_breaker(
        &self,
        key: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        if let Some(existing) = breakers.get(key) {
            return Arc::clone(existing);
        }

        let config = config.unwrap_or_else(|| self.config_for(key));
        log::debug!(
            "Creating circuit breaker '{}' (failure threshold {}, reset {:?})",
            key,
            config.failure_threshold(),
            config.reset_timeout()
        );
        let breaker = Arc::new(CircuitBreaker::named(key, config));
        breakers.insert(key.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Shorthand for a lookup without an explicit config
    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        self.get_circuit_breaker(key, None)
    }

    /// Forgets every breaker. Instances already handed out keep working but
    /// are no longer reachable through the registry.
    pub fn reset_all(&self) {
        let mut breakers = self.lock();
        log::debug!("Resetting {} circuit breakers", breakers.len());
        breakers.clear();
    }

    /// Returns the number of breakers created so far
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no breaker has been created yet
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns the keys of all live breakers, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn config_for(&self, key: &str) -> CircuitBreakerConfig {
        self.overrides
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
