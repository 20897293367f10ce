//! Retry policy with exponential/linear/fixed backoff + jitter, spec §4.1.
//!
//! Grounded on `resilience.py`'s `calculate_delay` / `retry_async`, with the
//! jitter formula generalized from a fixed 50%-100% window to a
//! caller-supplied `jitter_factor` per spec §4.1 ("uniform random factor in
//! `[1-jitter, 1+jitter]`").

use std::time::Duration;

use rand::Rng;

use crate::breaker::CircuitBreaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub cap: Duration,
    pub jitter_factor: f64,
    pub strategy: RetryStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            cap: Duration::from_secs(10),
            jitter_factor: 0.5,
            strategy: RetryStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Delay for attempt `n` (1-indexed), spec §4.1: `min(base*strategy(n),
    /// cap)` then scaled by a uniform factor in `[1-jitter, 1+jitter]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_secs_f64() * 1000.0;
        let raw_ms = match self.strategy {
            RetryStrategy::Fixed => base_ms,
            RetryStrategy::Linear => base_ms * attempt as f64,
            RetryStrategy::Exponential => base_ms * 2f64.powi(attempt as i32 - 1),
        };
        let capped_ms = raw_ms.min(self.cap.as_secs_f64() * 1000.0);

        let mut rng = rand::thread_rng();
        let jitter = if self.jitter_factor > 0.0 {
            rng.gen_range((1.0 - self.jitter_factor)..=(1.0 + self.jitter_factor))
        } else {
            1.0
        };
        let jittered = (capped_ms * jitter).max(0.0);
        Duration::from_secs_f64(jittered / 1000.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpenError;

impl std::fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CircuitOpen: breaker is open, call refused")
    }
}

impl std::error::Error for CircuitOpenError {}

/// Generic `execute(op, policy)` from spec §4.1: retry `op` according to
/// `policy`, consulting `is_retryable` to decide whether a given error is
/// eligible for another attempt. Returns immediately on success or on a
/// non-retryable error; re-raises (returns) the last error once attempts are
/// exhausted.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut is_retryable: impl FnMut(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= policy.max_attempts || !is_retryable(&e) {
                    return Err(e);
                }
                let delay = policy.delay_for_attempt(attempt);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// `with_breaker(name, op)` from spec §4.1: evaluate the breaker before
/// calling out, record the outcome, and propagate.
pub async fn with_breaker<T, E, F, Fut>(
    breaker: &CircuitBreaker,
    mut op: F,
) -> Result<T, WithBreakerError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    if !breaker.allow().await {
        return Err(WithBreakerError::CircuitOpen(CircuitOpenError));
    }
    match op().await {
        Ok(v) => {
            breaker.record_success().await;
            Ok(v)
        }
        Err(e) => {
            breaker.record_failure().await;
            Err(WithBreakerError::Inner(e))
        }
    }
}

#[derive(Debug)]
pub enum WithBreakerError<E> {
    CircuitOpen(CircuitOpenError),
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for WithBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WithBreakerError::CircuitOpen(e) => write!(f, "{e}"),
            WithBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}
