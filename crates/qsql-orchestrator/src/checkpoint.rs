//! Checkpoint persistence for the orchestrator driver, spec §4.11 point 3.
//!
//! `QueryState` is persisted after every node so a crashed/restarted driver
//! can resume from the last completed stage. The primary store is an
//! external collaborator (out of scope per spec §1); this crate only
//! defines its contract and the in-memory fallback the driver swaps in when
//! the primary fails repeatedly, grounded on the same bounded-LRU shape
//! `qsql_resilient_client::cache::FallbackCache` uses for C2.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::Mutex;
use uuid::Uuid;

/// Persists/restores a single query's serialized `QueryState`. Implemented
/// externally (a database, object store, etc.); this crate never assumes a
/// concrete backend.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, query_id: Uuid, state_json: &str) -> Result<(), String>;
    async fn load(&self, query_id: Uuid) -> Result<Option<String>, String>;
}

/// Bounded LRU over `query_id` ("thread_id" in spec's LangGraph-derived
/// vocabulary), capped at `max_entries`.
pub struct InMemoryCheckpointer {
    max_entries: usize,
    inner: Mutex<InMemoryInner>,
}

struct InMemoryInner {
    map: HashMap<Uuid, String>,
    order: Vec<Uuid>,
}

impl InMemoryCheckpointer {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            inner: Mutex::new(InMemoryInner {
                map: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointer {
    async fn save(&self, query_id: Uuid, state_json: &str) -> Result<(), String> {
        let mut inner = self.inner.lock().await;
        inner.map.insert(query_id, state_json.to_string());
        inner.order.retain(|id| *id != query_id);
        inner.order.push(query_id);
        while inner.order.len() > self.max_entries {
            let evict = inner.order.remove(0);
            inner.map.remove(&evict);
        }
        Ok(())
    }

    async fn load(&self, query_id: Uuid) -> Result<Option<String>, String> {
        Ok(self.inner.lock().await.map.get(&query_id).cloned())
    }
}

/// Wraps a primary [`CheckpointStore`] with an in-memory fallback that the
/// driver swaps to transparently once `failure_threshold` consecutive
/// primary failures have been observed (spec §4.11 point 3 / §7 "local
/// recovery policy"). The swap is sticky: once tripped, the primary is not
/// retried for the remainder of the process's life, matching "transparently
/// swaps in" rather than "retries periodically".
pub struct Checkpointer<P: CheckpointStore> {
    primary: P,
    fallback: InMemoryCheckpointer,
    failure_threshold: u32,
    consecutive_failures: AtomicU32,
    using_fallback: AtomicBool,
}

impl<P: CheckpointStore> Checkpointer<P> {
    pub fn new(primary: P, fallback_capacity: usize, failure_threshold: u32) -> Self {
        Self {
            primary,
            fallback: InMemoryCheckpointer::new(fallback_capacity),
            failure_threshold,
            consecutive_failures: AtomicU32::new(0),
            using_fallback: AtomicBool::new(false),
        }
    }

    pub fn is_using_fallback(&self) -> bool {
        self.using_fallback.load(Ordering::SeqCst)
    }

    async fn trip_if_needed(&self, failed: bool) {
        if failed {
            let count = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if count >= self.failure_threshold {
                if !self.using_fallback.swap(true, Ordering::SeqCst) {
                    tracing::warn!(
                        consecutive_failures = count,
                        "primary checkpoint store failing repeatedly, swapping to in-memory checkpointer"
                    );
                }
            }
        } else {
            self.consecutive_failures.store(0, Ordering::SeqCst);
        }
    }

    pub async fn save(&self, query_id: Uuid, state_json: &str) {
        if self.using_fallback.load(Ordering::SeqCst) {
            let _ = self.fallback.save(query_id, state_json).await;
            return;
        }
        let result = self.primary.save(query_id, state_json).await;
        self.trip_if_needed(result.is_err()).await;
        if result.is_err() && self.using_fallback.load(Ordering::SeqCst) {
            let _ = self.fallback.save(query_id, state_json).await;
        }
    }

    pub async fn load(&self, query_id: Uuid) -> Option<String> {
        if self.using_fallback.load(Ordering::SeqCst) {
            return self.fallback.load(query_id).await.ok().flatten();
        }
        match self.primary.load(query_id).await {
            Ok(value) => {
                self.trip_if_needed(false).await;
                value
            }
            Err(_) => {
                self.trip_if_needed(true).await;
                if self.using_fallback.load(Ordering::SeqCst) {
                    self.fallback.load(query_id).await.ok().flatten()
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as Counter;

    struct FlakyStore {
        fail_calls: Counter,
    }

    #[async_trait::async_trait]
    impl CheckpointStore for FlakyStore {
        async fn save(&self, _query_id: Uuid, _state_json: &str) -> Result<(), String> {
            self.fail_calls.fetch_add(1, Ordering::SeqCst);
            Err("primary unavailable".to_string())
        }
        async fn load(&self, _query_id: Uuid) -> Result<Option<String>, String> {
            Err("primary unavailable".to_string())
        }
    }

    struct ReliableStore {
        inner: Mutex<HashMap<Uuid, String>>,
    }

    #[async_trait::async_trait]
    impl CheckpointStore for ReliableStore {
        async fn save(&self, query_id: Uuid, state_json: &str) -> Result<(), String> {
            self.inner.lock().await.insert(query_id, state_json.to_string());
            Ok(())
        }
        async fn load(&self, query_id: Uuid) -> Result<Option<String>, String> {
            Ok(self.inner.lock().await.get(&query_id).cloned())
        }
    }

    #[tokio::test]
    async fn reliable_primary_never_trips_fallback() {
        let checkpointer = Checkpointer::new(
            ReliableStore { inner: Mutex::new(HashMap::new()) },
            4,
            3,
        );
        let id = Uuid::new_v4();
        checkpointer.save(id, "{}").await;
        assert!(!checkpointer.is_using_fallback());
        assert_eq!(checkpointer.load(id).await, Some("{}".to_string()));
    }

    #[tokio::test]
    async fn repeated_primary_failures_swap_to_fallback() {
        let checkpointer = Checkpointer::new(
            FlakyStore { fail_calls: Counter::new(0) },
            4,
            3,
        );
        let id = Uuid::new_v4();
        for _ in 0..3 {
            checkpointer.save(id, "{}").await;
        }
        assert!(checkpointer.is_using_fallback());
        // Fallback now serves reads/writes transparently.
        assert_eq!(checkpointer.load(id).await, Some("{}".to_string()));
    }

    #[tokio::test]
    async fn in_memory_checkpointer_evicts_lru_over_query_id() {
        let cp = InMemoryCheckpointer::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        cp.save(a, "a").await.unwrap();
        cp.save(b, "b").await.unwrap();
        cp.save(c, "c").await.unwrap();
        assert_eq!(cp.load(a).await.unwrap(), None);
        assert_eq!(cp.load(b).await.unwrap(), Some("b".to_string()));
    }
}
