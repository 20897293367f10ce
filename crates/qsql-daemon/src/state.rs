//! Shared runtime state for qsql-daemon.
//!
//! All fields are `Arc`-wrapped so handlers can cheaply clone `Arc<AppState>`
//! out of Axum's `State` extractor; this module owns the wiring, not the
//! HTTP surface (that's `routes.rs`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use qsql_approval::store::ApprovalStore;
use qsql_audit::AuditWriter;
use qsql_degraded::DegradedModeRegistry;
use qsql_llm::{GatewayConfig, LlmGateway, LlmProvider};
use qsql_orchestrator::{CancelSignal, Checkpointer, InMemoryCheckpointer, OrchestratorDriver, Runtime, RuntimeConfig};
use qsql_quota::QuotaEnforcer;
use qsql_ratelimit::RateLimiter;
use qsql_resilience::{BreakerRegistry, RetryPolicy};
use qsql_resilient_client::ResilientKv;
use qsql_router::{DatabaseRouter, RouterConfig};
use qsql_schema::{SchemaResolver, SchemaSource};
use qsql_state::{PublisherConfig, StatePublisher};
use qsql_validator::risk::RiskPolicy;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::kv::LocalKv;
use crate::schema_source::UnconfiguredSchemaSource;

/// Static build metadata included in health responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// The concrete `RemoteKv`/`CheckpointStore` pair this daemon binary wires
/// up. `Runtime`/`OrchestratorDriver` stay generic so a future deployment
/// can substitute a real Redis-backed `RemoteKv` and a database-backed
/// `CheckpointStore` without touching qsql-orchestrator.
pub type DaemonRuntime = Runtime<LocalKv, InMemoryCheckpointer>;
pub type DaemonDriver = OrchestratorDriver<LocalKv, InMemoryCheckpointer>;

pub struct AppState {
    pub build: BuildInfo,
    pub runtime: Arc<DaemonRuntime>,
    pub driver: Arc<DaemonDriver>,
    pub rate_limiter: Arc<RateLimiter<LocalKv>>,
    pub audit: Mutex<AuditWriter>,
    /// One cancel signal per in-flight query, so `/cancel` can reach a
    /// specific `run_loop` iteration (spec §4.11 point 6). Swept on
    /// terminal outcomes by the submit/resume handlers.
    pub cancel_signals: RwLock<HashMap<Uuid, CancelSignal>>,
}

const LOCAL_KV_MAX_ENTRIES: usize = 4096;
const LOCAL_KV_DEFAULT_TTL: Duration = Duration::from_secs(3600);

async fn local_kv(name: &str, breakers: &BreakerRegistry, degraded: &Arc<DegradedModeRegistry>) -> ResilientKv<LocalKv> {
    ResilientKv::new(
        name,
        LocalKv::new(LOCAL_KV_MAX_ENTRIES, LOCAL_KV_DEFAULT_TTL),
        breakers,
        LOCAL_KV_MAX_ENTRIES,
        LOCAL_KV_DEFAULT_TTL,
        RetryPolicy::default(),
        Some(Arc::clone(degraded)),
    )
    .await
}

impl AppState {
    /// Builds the full collaborator graph for a standalone daemon process:
    /// `LocalKv` behind every `RemoteKv` seam (schema cache, quota, result
    /// cache, rate limiter), an in-memory checkpoint store, and an
    /// append-only audit ledger at `audit_log_path`. No catalog adapter is
    /// wired up (spec §1 scopes the live Oracle/Doris/Postgres schema
    /// sources out as external collaborators) — see [`Self::new_with_schema_source`]
    /// for deployments or tests that supply their own.
    pub async fn new(llm_provider: Box<dyn LlmProvider>, audit_log_path: &str) -> Result<Self> {
        Self::new_with_schema_source(llm_provider, Box::new(UnconfiguredSchemaSource), audit_log_path).await
    }

    /// Same wiring as [`Self::new`], but with the schema source (C9)
    /// injected rather than defaulted to [`UnconfiguredSchemaSource`] —
    /// lets a real deployment plug in its Oracle/Doris/Postgres catalog
    /// adapter, and lets scenario tests exercise `retrieve_context` past an
    /// always-fails stub without standing up a live backend.
    pub async fn new_with_schema_source(
        llm_provider: Box<dyn LlmProvider>,
        schema_source: Box<dyn SchemaSource>,
        audit_log_path: &str,
    ) -> Result<Self> {
        let breakers = Arc::new(BreakerRegistry::new());
        let degraded = Arc::new(DegradedModeRegistry::new());
        let state_publisher = Arc::new(StatePublisher::new(PublisherConfig::default()));
        let approvals = Arc::new(ApprovalStore::new());

        let schema_kv = local_kv("schema-cache", &breakers, &degraded).await;
        let schema_resolver = Arc::new(SchemaResolver::new(
            schema_source,
            schema_kv,
            qsql_schema::DEFAULT_SCHEMA_CACHE_TTL,
        ));

        let quota_kv = local_kv("quota", &breakers, &degraded).await;
        let quota = Arc::new(QuotaEnforcer::new(quota_kv));

        let result_cache = Arc::new(local_kv("result-cache", &breakers, &degraded).await);

        let rate_limit_kv = local_kv("rate-limit", &breakers, &degraded).await;
        let rate_limiter = Arc::new(RateLimiter::new(rate_limit_kv));

        let llm = Arc::new(LlmGateway::new(llm_provider, GatewayConfig::default()));

        // No Oracle pool / Doris MCP client / Postgres adapter is wired for
        // this standalone process; every `execute` reports the backend as
        // not configured until a deployment provides one.
        let router = Arc::new(DatabaseRouter::new(None, None, None, RouterConfig::default()));
        let checkpointer = Arc::new(Checkpointer::new(InMemoryCheckpointer::new(1024), 1024, 3));

        let runtime = Arc::new(Runtime::new(
            breakers,
            degraded,
            state_publisher,
            approvals,
            schema_resolver,
            quota,
            result_cache,
            llm,
            router,
            checkpointer,
            RiskPolicy::default(),
            RuntimeConfig::default(),
        ));
        let driver = Arc::new(OrchestratorDriver::new(Arc::clone(&runtime)));

        let audit = Mutex::new(AuditWriter::new(audit_log_path).context("open audit ledger")?);

        Ok(Self {
            build: BuildInfo { service: "qsql-daemon", version: env!("CARGO_PKG_VERSION") },
            runtime,
            driver,
            rate_limiter,
            audit,
            cancel_signals: RwLock::new(HashMap::new()),
        })
    }

    pub async fn register_cancel_signal(&self, query_id: Uuid, signal: CancelSignal) {
        self.cancel_signals.write().await.insert(query_id, signal);
    }

    pub async fn take_cancel_signal(&self, query_id: Uuid) -> Option<CancelSignal> {
        self.cancel_signals.write().await.remove(&query_id)
    }

    pub async fn cancel_signal(&self, query_id: Uuid) -> Option<CancelSignal> {
        self.cancel_signals.read().await.get(&query_id).cloned()
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_secs()
}
