//! `Runtime`: the explicit, constructor-injected bundle of handles every
//! orchestrator node needs, spec §9 "Singletons / process-wide state" —
//! "wire a `Runtime` struct carrying handles to each registry" instead of
//! implicit globals.

use std::sync::Arc;
use std::time::Duration;

use qsql_approval::store::ApprovalStore;
use qsql_degraded::DegradedModeRegistry;
use qsql_llm::LlmGateway;
use qsql_quota::QuotaEnforcer;
use qsql_resilience::BreakerRegistry;
use qsql_resilient_client::{RemoteKv, ResilientKv};
use qsql_router::DatabaseRouter;
use qsql_schema::SchemaResolver;
use qsql_schemas::{DatabaseType, Role, RoleLimits};
use qsql_state::StatePublisher;
use qsql_validator::risk::RiskPolicy;

use crate::checkpoint::{CheckpointStore, Checkpointer};

/// Tunables that are not themselves registries — node retry bounds, default
/// row caps, the HMAC secret behind session-binding fingerprints. Carried
/// in full by `qsql-config` at wire-up time and handed to `Runtime::new`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_node_retries: u32,
    pub default_row_limit: u64,
    pub approval_hmac_secret: String,
    pub ip_tolerance: qsql_approval::binding::IpTolerance,
    pub llm_provider: String,
    pub llm_enable_fallback: bool,
    pub result_cache_ttl: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_node_retries: 2,
            default_row_limit: 1000,
            approval_hmac_secret: "change-me".to_string(),
            ip_tolerance: qsql_approval::binding::IpTolerance::Subnet,
            llm_provider: "mistral".to_string(),
            llm_enable_fallback: true,
            result_cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// All process-wide collaborators an orchestrator node may need, generic
/// over the single resilient-store backend `K` shared by the schema cache,
/// quota counters, and result cache (spec §6: one Redis-shaped store behind
/// several key namespaces).
pub struct Runtime<K: RemoteKv, C: CheckpointStore> {
    pub breakers: Arc<BreakerRegistry>,
    pub degraded: Arc<DegradedModeRegistry>,
    pub state_publisher: Arc<StatePublisher>,
    pub approvals: Arc<ApprovalStore>,
    pub schema_resolver: Arc<SchemaResolver<K>>,
    pub quota: Arc<QuotaEnforcer<K>>,
    pub result_cache: Arc<ResilientKv<K>>,
    pub llm: Arc<LlmGateway>,
    pub router: Arc<DatabaseRouter>,
    pub checkpointer: Arc<Checkpointer<C>>,
    pub risk_policy: RiskPolicy,
    pub config: RuntimeConfig,
}

impl<K: RemoteKv, C: CheckpointStore> Runtime<K, C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        breakers: Arc<BreakerRegistry>,
        degraded: Arc<DegradedModeRegistry>,
        state_publisher: Arc<StatePublisher>,
        approvals: Arc<ApprovalStore>,
        schema_resolver: Arc<SchemaResolver<K>>,
        quota: Arc<QuotaEnforcer<K>>,
        result_cache: Arc<ResilientKv<K>>,
        llm: Arc<LlmGateway>,
        router: Arc<DatabaseRouter>,
        checkpointer: Arc<Checkpointer<C>>,
        risk_policy: RiskPolicy,
        config: RuntimeConfig,
    ) -> Self {
        Self {
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
            risk_policy,
            config,
        }
    }

    /// Role limits for `role`. Kept as a pure function of `Role` (spec
    /// §4.12's table is a fixed lookup, not per-deployment data) rather
    /// than a field on `Runtime`, so tests never need to fabricate one.
    pub fn role_limits(&self, role: Role) -> RoleLimits {
        qsql_quota::default_role_limits(role)
    }

    /// The dialect a backend's SQL is natively authored/executed in; used
    /// by nodes to pick `source_dialect`/`target_dialect` for C6.
    pub fn dialect_for(&self, database_type: DatabaseType) -> DatabaseType {
        database_type
    }
}
