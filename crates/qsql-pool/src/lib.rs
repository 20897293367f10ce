//! qsql-pool — fixed-size pool of long-lived database client processes
//! (spec C4 / §4.4).
//!
//! Grounded on `mqk-isolation`'s process-handle bookkeeping pattern
//! (id/state/created_at/last_used) and on `resilience.py`'s breaker for the
//! pool-level `CircuitOpen` failure mode, kept separate from any per-client
//! breaker owned by `qsql-resilient-client`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use qsql_resilience::{CircuitBreaker, CircuitBreakerConfig};
use qsql_schemas::{ExecutionResult, PooledProcessState, PooledProcessView};
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

/// A long-lived database client process. Implementations own the actual
/// session (Oracle/Doris/Postgres handle); the pool only tracks lifecycle
/// and health, never the query surface itself.
#[async_trait::async_trait]
pub trait PooledClient: Send + Sync {
    /// Cheap liveness check used by the health monitor.
    async fn is_healthy(&self) -> bool;

    /// Runs `sql` against this process's session, spec §4.15's Oracle
    /// dispatch path ("acquire pooled client, call `execute_sql`"). Every
    /// backend the pool fronts speaks this same surface; the uniform
    /// result envelope is normalized upstream of this trait, not here.
    async fn execute_sql(&self, sql: &str) -> Result<ExecutionResult, String>;
}

/// Creates fresh `PooledClient`s on initialize and on recycle.
#[async_trait::async_trait]
pub trait ProcessFactory: Send + Sync {
    async fn spawn(&self, id: Uuid) -> Result<Arc<dyn PooledClient>, String>;
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub pool_size: usize,
    pub max_queries_per_process: u64,
    pub error_threshold: u32,
    pub health_check_interval: Duration,
    pub acquire_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            max_queries_per_process: 1000,
            error_threshold: 3,
            health_check_interval: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    PoolExhausted,
    PoolShuttingDown,
    CircuitOpen,
    SpawnFailed(String),
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::PoolExhausted => write!(f, "pool exhausted: no idle process within timeout"),
            PoolError::PoolShuttingDown => write!(f, "pool is shutting down"),
            PoolError::CircuitOpen => write!(f, "pool breaker is open"),
            PoolError::SpawnFailed(e) => write!(f, "failed to spawn process: {e}"),
        }
    }
}

impl std::error::Error for PoolError {}

struct ProcessRecord {
    client: Arc<dyn PooledClient>,
    state: PooledProcessState,
    queries_executed: u64,
    errors: u32,
    created_at: chrono::DateTime<Utc>,
    last_used: chrono::DateTime<Utc>,
}

impl ProcessRecord {
    fn view(&self, id: Uuid) -> PooledProcessView {
        PooledProcessView {
            id,
            state: self.state,
            queries_executed: self.queries_executed,
            errors: self.errors,
            created_at: self.created_at,
            last_used: self.last_used,
        }
    }
}

struct Shared {
    config: PoolConfig,
    factory: Arc<dyn ProcessFactory>,
    processes: Mutex<HashMap<Uuid, ProcessRecord>>,
    idle: Mutex<VecDeque<Uuid>>,
    idle_notify: Notify,
    breaker: Arc<CircuitBreaker>,
    shutting_down: AtomicBool,
}

/// Manages a fixed-size set of pooled database client processes.
pub struct Pool {
    shared: Arc<Shared>,
}

/// Scoped acquisition handle, spec §4.4: on drop, the process is returned to
/// the idle queue or recycled depending on the recycle policy.
pub struct Lease {
    shared: Arc<Shared>,
    id: Uuid,
    client: Arc<dyn PooledClient>,
    errored: bool,
    returned: bool,
}

impl Lease {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client(&self) -> &Arc<dyn PooledClient> {
        &self.client
    }

    /// Mark this use as having produced a backend error, counted toward the
    /// recycle-on-error-threshold policy.
    pub fn mark_error(&mut self) {
        self.errored = true;
    }

    /// Explicitly release back to the pool, recycling if warranted. Dropping
    /// the lease without calling this does the same via a spawned task.
    pub async fn release(mut self) {
        self.returned = true;
        Pool::release_process(Arc::clone(&self.shared), self.id, self.errored).await;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.returned {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let id = self.id;
        let errored = self.errored;
        tokio::spawn(async move {
            Pool::release_process(shared, id, errored).await;
        });
    }
}

impl Pool {
    /// Spawns `config.pool_size` processes, each pre-connected, and starts
    /// the background health monitor. Spec §4.4 `initialize()`.
    pub async fn initialize(
        config: PoolConfig,
        factory: Arc<dyn ProcessFactory>,
    ) -> Result<Self, PoolError> {
        let shared = Arc::new(Shared {
            breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig::new("db-pool"))),
            processes: Mutex::new(HashMap::new()),
            idle: Mutex::new(VecDeque::new()),
            idle_notify: Notify::new(),
            shutting_down: AtomicBool::new(false),
            factory,
            config,
        });

        for _ in 0..shared.config.pool_size {
            let id = Uuid::new_v4();
            Self::spawn_and_register(&shared, id).await?;
        }

        let monitor_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            Self::health_monitor_loop(monitor_shared).await;
        });

        Ok(Self { shared })
    }

    async fn spawn_and_register(shared: &Arc<Shared>, id: Uuid) -> Result<(), PoolError> {
        let client = shared
            .factory
            .spawn(id)
            .await
            .map_err(PoolError::SpawnFailed)?;
        let now = Utc::now();
        let record = ProcessRecord {
            client,
            state: PooledProcessState::Idle,
            queries_executed: 0,
            errors: 0,
            created_at: now,
            last_used: now,
        };
        shared.processes.lock().await.insert(id, record);
        shared.idle.lock().await.push_back(id);
        shared.idle_notify.notify_one();
        Ok(())
    }

    /// Waits on the idle queue up to `timeout`, spec §4.4 `acquire(timeout)`.
    pub async fn acquire(&self, acquire_timeout: Duration) -> Result<Lease, PoolError> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::PoolShuttingDown);
        }
        if !self.shared.breaker.allow().await {
            return Err(PoolError::CircuitOpen);
        }

        let result = timeout(acquire_timeout, self.wait_for_idle()).await;
        match result {
            Ok(Some(id)) => {
                self.shared.breaker.record_success().await;
                let client = {
                    let mut procs = self.shared.processes.lock().await;
                    let rec = procs.get_mut(&id).expect("acquired id must exist");
                    rec.state = PooledProcessState::Busy;
                    rec.last_used = Utc::now();
                    Arc::clone(&rec.client)
                };
                Ok(Lease {
                    shared: Arc::clone(&self.shared),
                    id,
                    client,
                    errored: false,
                    returned: false,
                })
            }
            Ok(None) | Err(_) => {
                self.shared.breaker.record_failure().await;
                Err(PoolError::PoolExhausted)
            }
        }
    }

    async fn wait_for_idle(&self) -> Option<Uuid> {
        loop {
            if let Some(id) = self.shared.idle.lock().await.pop_front() {
                return Some(id);
            }
            self.shared.idle_notify.notified().await;
        }
    }

    async fn release_process(shared: Arc<Shared>, id: Uuid, errored: bool) {
        let should_recycle = {
            let mut procs = shared.processes.lock().await;
            if let Some(rec) = procs.get_mut(&id) {
                rec.queries_executed += 1;
                if errored {
                    rec.errors += 1;
                }
                rec.queries_executed >= shared.config.max_queries_per_process
                    || rec.errors >= shared.config.error_threshold
            } else {
                false
            }
        };

        if should_recycle {
            Self::recycle(&shared, id).await;
        } else {
            let mut procs = shared.processes.lock().await;
            if let Some(rec) = procs.get_mut(&id) {
                rec.state = PooledProcessState::Idle;
            }
            drop(procs);
            shared.idle.lock().await.push_back(id);
            shared.idle_notify.notify_one();
        }
    }

    /// Recycle policy, spec §4.4: close the old process, spawn a new one
    /// with the same id, re-connect, re-enqueue.
    async fn recycle(shared: &Arc<Shared>, id: Uuid) {
        info!(process_id = %id, "recycling pooled process");
        match shared.factory.spawn(id).await {
            Ok(client) => {
                let mut procs = shared.processes.lock().await;
                let now = Utc::now();
                procs.insert(
                    id,
                    ProcessRecord {
                        client,
                        state: PooledProcessState::Idle,
                        queries_executed: 0,
                        errors: 0,
                        created_at: now,
                        last_used: now,
                    },
                );
                drop(procs);
                shared.idle.lock().await.push_back(id);
                shared.idle_notify.notify_one();
            }
            Err(e) => {
                warn!(process_id = %id, error = %e, "failed to respawn during recycle, marking FAILED");
                let mut procs = shared.processes.lock().await;
                if let Some(rec) = procs.get_mut(&id) {
                    rec.state = PooledProcessState::Failed;
                }
            }
        }
    }

    async fn health_monitor_loop(shared: Arc<Shared>) {
        let mut interval = tokio::time::interval(shared.config.health_check_interval);
        loop {
            interval.tick().await;
            if shared.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            let failed: Vec<Uuid> = {
                let procs = shared.processes.lock().await;
                procs
                    .iter()
                    .filter(|(_, r)| r.state == PooledProcessState::Failed)
                    .map(|(id, _)| *id)
                    .collect()
            };
            if !failed.is_empty() {
                info!(count = failed.len(), "health monitor recycling failed processes");
            }
            for id in failed {
                Self::recycle(&shared, id).await;
            }
        }
    }

    /// Stops accepting new acquires and waits for outstanding ones to drain,
    /// then force-closes. Spec §4.4 `shutdown(drain_timeout)`.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + drain_timeout;
        loop {
            let all_idle = {
                let procs = self.shared.processes.lock().await;
                procs
                    .values()
                    .all(|r| r.state != PooledProcessState::Busy)
            };
            if all_idle || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let mut procs = self.shared.processes.lock().await;
        for rec in procs.values_mut() {
            rec.state = PooledProcessState::Shutdown;
        }
    }

    pub async fn views(&self) -> Vec<PooledProcessView> {
        let procs = self.shared.processes.lock().await;
        procs.iter().map(|(id, r)| r.view(*id)).collect()
    }

    pub async fn idle_count(&self) -> usize {
        self.shared.idle.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct StubClient;

    #[async_trait::async_trait]
    impl PooledClient for StubClient {
        async fn is_healthy(&self) -> bool {
            true
        }

        async fn execute_sql(&self, _sql: &str) -> Result<ExecutionResult, String> {
            Ok(ExecutionResult::default())
        }
    }

    struct StubFactory {
        fail_spawns: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ProcessFactory for StubFactory {
        async fn spawn(&self, _id: Uuid) -> Result<Arc<dyn PooledClient>, String> {
            if self.fail_spawns.load(Ordering::SeqCst) > 0 {
                self.fail_spawns.fetch_sub(1, Ordering::SeqCst);
                return Err("connect refused".to_string());
            }
            Ok(Arc::new(StubClient))
        }
    }

    fn test_config(size: usize) -> PoolConfig {
        PoolConfig {
            pool_size: size,
            max_queries_per_process: 1000,
            error_threshold: 3,
            health_check_interval: Duration::from_secs(3600),
            acquire_timeout: Duration::from_millis(200),
            drain_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn initialize_spawns_pool_size_processes() {
        let factory = Arc::new(StubFactory {
            fail_spawns: AtomicU32::new(0),
        });
        let pool = Pool::initialize(test_config(3), factory).await.unwrap();
        assert_eq!(pool.views().await.len(), 3);
        assert_eq!(pool.idle_count().await, 3);
    }

    #[tokio::test]
    async fn acquire_then_drop_returns_to_idle() {
        let factory = Arc::new(StubFactory {
            fail_spawns: AtomicU32::new(0),
        });
        let pool = Pool::initialize(test_config(1), factory).await.unwrap();
        {
            let lease = pool.acquire(Duration::from_millis(100)).await.unwrap();
            assert_eq!(pool.idle_count().await, 0);
            drop(lease);
        }
        // releasing happens on a spawned task; yield until it runs.
        for _ in 0..20 {
            if pool.idle_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.idle_count().await, 1);
    }

    #[tokio::test]
    async fn acquire_fails_with_pool_exhausted_when_all_busy() {
        let factory = Arc::new(StubFactory {
            fail_spawns: AtomicU32::new(0),
        });
        let pool = Pool::initialize(test_config(1), factory).await.unwrap();
        let _lease = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let second = pool.acquire(Duration::from_millis(50)).await;
        assert_eq!(second, Err(PoolError::PoolExhausted));
    }

    #[tokio::test]
    async fn recycles_on_max_queries_exceeded() {
        let factory = Arc::new(StubFactory {
            fail_spawns: AtomicU32::new(0),
        });
        let mut config = test_config(1);
        config.max_queries_per_process = 1;
        let pool = Pool::initialize(config, factory).await.unwrap();
        let id_before = pool.views().await[0].id;
        let lease = pool.acquire(Duration::from_millis(100)).await.unwrap();
        lease.release().await;
        for _ in 0..20 {
            if pool.views().await.iter().any(|v| v.queries_executed == 0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let views = pool.views().await;
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].id, id_before, "recycle preserves the process id");
        assert_eq!(views[0].queries_executed, 0, "recycled process resets counters");
    }

    #[tokio::test]
    async fn shutdown_marks_all_processes_shutdown() {
        let factory = Arc::new(StubFactory {
            fail_spawns: AtomicU32::new(0),
        });
        let pool = Pool::initialize(test_config(2), factory).await.unwrap();
        pool.shutdown(Duration::from_millis(100)).await;
        let views = pool.views().await;
        assert!(views.iter().all(|v| v.state == PooledProcessState::Shutdown));
    }

    #[tokio::test]
    async fn acquire_after_shutdown_is_refused() {
        let factory = Arc::new(StubFactory {
            fail_spawns: AtomicU32::new(0),
        });
        let pool = Pool::initialize(test_config(1), factory).await.unwrap();
        pool.shutdown(Duration::from_millis(50)).await;
        let result = pool.acquire(Duration::from_millis(50)).await;
        assert_eq!(result, Err(PoolError::PoolShuttingDown));
    }
}
