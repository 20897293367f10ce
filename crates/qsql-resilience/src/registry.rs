//! Named-breaker registry, spec §4.1 "Named breakers are shared
//! process-wide via a registry." Per spec §9 design note, this is never a
//! hidden global: it's constructed once by wire-up code and handed out via
//! `Runtime` (see `qsql-orchestrator::Runtime`), mirroring
//! `resilience.py`'s `ResilienceManager` but without a module-level
//! singleton.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitStatus};

#[derive(Default)]
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the named breaker, creating it with default config on first use.
    pub async fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(cb) = self.breakers.read().await.get(name) {
            return Arc::clone(cb);
        }
        let mut guard = self.breakers.write().await;
        Arc::clone(
            guard
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(CircuitBreakerConfig::new(name)))),
        )
    }

    pub async fn get_or_create_with(&self, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let name = config.name.clone();
        if let Some(cb) = self.breakers.read().await.get(&name) {
            return Arc::clone(cb);
        }
        let mut guard = self.breakers.write().await;
        Arc::clone(
            guard
                .entry(name)
                .or_insert_with(|| Arc::new(CircuitBreaker::new(config))),
        )
    }

    pub async fn all_status(&self) -> Vec<CircuitStatus> {
        let guard = self.breakers.read().await;
        let mut out = Vec::with_capacity(guard.len());
        for cb in guard.values() {
            out.push(cb.status().await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent_per_name() {
        let reg = BreakerRegistry::new();
        let a = reg.get_or_create("redis").await;
        let b = reg.get_or_create("redis").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn distinct_names_get_distinct_breakers() {
        let reg = BreakerRegistry::new();
        let a = reg.get_or_create("redis").await;
        let b = reg.get_or_create("llm").await;
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
