//! qsql-resilience — circuit breakers and retry policy (spec C1 / §4.1).
//!
//! Grounded on `original_source/backend/app/core/resilience.py`'s
//! `CircuitBreaker`/`RetryConfig` pair, re-expressed as atomic Rust state
//! behind `tokio::sync::Mutex` instead of Python's `asyncio.Lock`, and on
//! the `GateRefusal`-style hand-rolled error enum from
//! `mqk-execution::gateway`.

pub mod breaker;
pub mod registry;
pub mod retry;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatus};
pub use registry::BreakerRegistry;
pub use retry::{retry, CircuitOpenError, RetryPolicy, RetryStrategy};
