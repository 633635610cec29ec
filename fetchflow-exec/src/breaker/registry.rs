use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{BreakerConfig, BreakerSnapshot, CircuitBreaker};

/// One [`CircuitBreaker`] per dependency name, created on first use.
///
/// Passed explicitly to whatever needs breakers; there is no global
/// instance.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    default_config: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    breakers: Mutex<BTreeMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            default_config,
            overrides: HashMap::new(),
            breakers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_override(mut self, name: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    pub fn config_for(&self, name: &str) -> &BreakerConfig {
        self.overrides.get(name).unwrap_or(&self.default_config)
    }

    /// A registry with the same configuration and no breaker state.
    pub fn fresh(&self) -> Self {
        Self {
            default_config: self.default_config.clone(),
            overrides: self.overrides.clone(),
            breakers: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        if let Some(existing) = breakers.get(name) {
            return existing.clone();
        }
        let config = self.config_for(name).clone();
        debug!(breaker = name, ?config, "creating circuit breaker");
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    /// Snapshots of every breaker created so far, ordered by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.lock().values().map(|b| b.snapshot()).collect()
    }

    pub fn reset_all(&self) {
        for breaker in self.lock().values() {
            breaker.reset();
        }
    }
}
