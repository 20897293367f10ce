//! Builds a fully-wired `Runtime<InMemoryKv, InMemoryCheckpointer>` for
//! scenario tests, so every crate downstream of qsql-orchestrator doesn't
//! reimplement the same dozen-collaborator constructor.

use std::sync::Arc;
use std::time::Duration;

use qsql_approval::store::ApprovalStore;
use qsql_degraded::DegradedModeRegistry;
use qsql_llm::{GatewayConfig, LlmGateway, LlmProvider};
use qsql_orchestrator::{Checkpointer, InMemoryCheckpointer, Runtime, RuntimeConfig};
use qsql_quota::QuotaEnforcer;
use qsql_resilience::{BreakerRegistry, RetryPolicy};
use qsql_resilient_client::ResilientKv;
use qsql_router::{DatabaseRouter, RouterConfig};
use qsql_schema::{SchemaResolver, SchemaSource};
use qsql_state::{PublisherConfig, StatePublisher};
use qsql_validator::risk::RiskPolicy;

use crate::kv::InMemoryKv;
use crate::schema::FixedSchemaSource;

const TEST_CACHE_TTL: Duration = Duration::from_secs(60);

async fn resilient_kv(name: &str, breakers: &BreakerRegistry, degraded: &Arc<DegradedModeRegistry>) -> ResilientKv<InMemoryKv> {
    ResilientKv::new(
        name,
        InMemoryKv::new(),
        breakers,
        64,
        TEST_CACHE_TTL,
        RetryPolicy::default(),
        Some(Arc::clone(degraded)),
    )
    .await
}

/// Builds a `Runtime` backed entirely by in-memory fakes: `FixedSchemaSource`
/// for schema resolution, no database backend wired into the router (any
/// `execute` reaches the "backend not configured" error path), and the
/// given `LlmProvider` for every LLM-backed node.
pub async fn build_test_runtime(
    llm: Box<dyn LlmProvider>,
) -> Arc<Runtime<InMemoryKv, InMemoryCheckpointer>> {
    build_test_runtime_with_schema(llm, Box::new(FixedSchemaSource)).await
}

/// Same as [`build_test_runtime`], but with a caller-supplied `SchemaSource`
/// (e.g. [`crate::schema::UnreachableSchemaSource`] to exercise the
/// `retrieve_context` error path).
pub async fn build_test_runtime_with_schema(
    llm: Box<dyn LlmProvider>,
    schema_source: Box<dyn SchemaSource>,
) -> Arc<Runtime<InMemoryKv, InMemoryCheckpointer>> {
    let breakers = Arc::new(BreakerRegistry::new());
    let degraded = Arc::new(DegradedModeRegistry::new());
    let state_publisher = Arc::new(StatePublisher::new(PublisherConfig::default()));
    let approvals = Arc::new(ApprovalStore::new());

    let schema_kv = resilient_kv("schema-cache-test", &breakers, &degraded).await;
    let schema_resolver = Arc::new(SchemaResolver::new(schema_source, schema_kv, TEST_CACHE_TTL));

    let quota_kv = resilient_kv("quota-test", &breakers, &degraded).await;
    let quota = Arc::new(QuotaEnforcer::new(quota_kv));

    let result_cache = Arc::new(resilient_kv("result-cache-test", &breakers, &degraded).await);

    let llm_gateway = Arc::new(LlmGateway::new(
        llm,
        GatewayConfig { providers: vec!["mistral".to_string()], ..GatewayConfig::default() },
    ));

    let router = Arc::new(DatabaseRouter::new(None, None, None, RouterConfig::default()));
    let checkpointer = Arc::new(Checkpointer::new(InMemoryCheckpointer::new(16), 16, 3));

    Arc::new(Runtime::new(
        breakers,
        degraded,
        state_publisher,
        approvals,
        schema_resolver,
        quota,
        result_cache,
        llm_gateway,
        router,
        checkpointer,
        RiskPolicy::default(),
        RuntimeConfig::default(),
    ))
}
