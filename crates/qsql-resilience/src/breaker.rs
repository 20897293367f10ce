//! Circuit breaker, spec §3 `CircuitBreaker` / §4.1.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub name: String,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

/// A point-in-time snapshot of breaker bookkeeping, for status reporting
/// (consumed by C2's `status()` and by C3).
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Generic circuit breaker. All state transitions are serialized behind a
/// single mutex — spec §3 invariant "only one state at a time; all
/// transitions log a state change", and §5 "Circuit breakers ... shared;
/// all operations atomic".
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// `allow()` from spec §4.1: performs the OPEN -> HALF_OPEN timer check
    /// as part of evaluating whether a call may proceed. Testable property
    /// (spec §8): if this returns false, the wrapped operation must not be
    /// invoked — callers must check `allow()` before calling out.
    pub async fn allow(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    info!(breaker = %self.config.name, "circuit breaker transitioning to HALF_OPEN");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    info!(breaker = %self.config.name, "circuit breaker CLOSED - service recovered");
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failure_count += 1;
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(breaker = %self.config.name, failures = inner.failure_count, "circuit breaker OPEN");
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!(breaker = %self.config.name, "circuit breaker OPEN - failure during recovery");
            }
            CircuitState::Open => {}
        }
    }

    pub async fn status(&self) -> CircuitStatus {
        let inner = self.inner.lock().await;
        CircuitStatus {
            name: self.config.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(name: &str) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            name: name.to_string(),
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(20),
            success_threshold: 2,
        }
    }

    #[tokio::test]
    async fn closed_allows_calls() {
        let cb = CircuitBreaker::new(fast_config("t1"));
        assert!(cb.allow().await);
    }

    #[tokio::test]
    async fn trips_open_at_failure_threshold() {
        let cb = CircuitBreaker::new(fast_config("t2"));
        for _ in 0..2 {
            cb.record_failure().await;
            assert_eq!(cb.state().await, CircuitState::Closed);
        }
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow().await);
    }

    #[tokio::test]
    async fn half_opens_after_recovery_timeout_then_closes_on_successes() {
        let cb = CircuitBreaker::new(fast_config("t3"));
        for _ in 0..3 {
            cb.record_failure().await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cb.allow().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(fast_config("t4"));
        for _ in 0..3 {
            cb.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cb.allow().await);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_count_while_closed() {
        let cb = CircuitBreaker::new(fast_config("t5"));
        cb.record_failure().await;
        cb.record_failure().await;
        cb.record_success().await;
        let status = cb.status().await;
        assert_eq!(status.failure_count, 0);
        assert_eq!(status.state, CircuitState::Closed);
    }
}
