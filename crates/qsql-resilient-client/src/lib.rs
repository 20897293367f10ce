//! qsql-resilient-client — resilient wrappers around external dependencies
//! (spec C2 / §4.2), composed from `qsql-resilience` (breaker + retry) and a
//! bounded local fallback cache.

pub mod cache;
pub mod wrapper;

pub use cache::{CacheCounters, FallbackCache};
pub use wrapper::{OpCounters, RemoteKv, ResilientKv, WrapperStatus};
