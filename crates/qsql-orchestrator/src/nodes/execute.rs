//! Node 6: `execute`, spec §4.10 / §4.12 / §4.15.
//!
//! Enforces the per-role query and cost quotas (both must pass before
//! dispatch, spec §4.12), consults the result cache, then routes the
//! sandboxed SQL to its backend. A `NormalizedError` stashes its retry
//! classification into `state.extras` so the driver (C11) can decide
//! whether to retry this node or terminate.

use sha2::{Digest, Sha256};

use qsql_resilient_client::RemoteKv;
use qsql_schemas::QueryState;

use crate::checkpoint::CheckpointStore;
use crate::nodes::{EXTRA_LAST_ERROR_CATEGORY, EXTRA_LAST_ERROR_RETRYABLE};
use crate::runtime::Runtime;

/// Flat per-query cost estimate: one cent per 50 rows of the effective cap,
/// floored at one cent. This crate has no real unit-cost model to ground
/// against; it exists only so `check_cost_quota`/`track_query_cost` have a
/// non-zero signal to operate on.
fn estimate_cost_cents(row_limit: u64) -> u64 {
    (row_limit / 50).max(1)
}

fn cache_key(database_type: qsql_schemas::DatabaseType, sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(database_type.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(sql.as_bytes());
    format!("resultcache:{}", hex::encode(hasher.finalize()))
}

pub async fn run<K: RemoteKv, C: CheckpointStore>(rt: &Runtime<K, C>, state: &mut QueryState) {
    let span = tracing::info_span!("node.execute", query_id = %state.query_id);
    let _enter = span.enter();

    let sql = match state
        .validation_result
        .as_ref()
        .and_then(|v| v.sandboxed_sql.clone())
        .or_else(|| state.sql_query.clone())
    {
        Some(sql) => sql,
        None => {
            state.error = Some("execute reached with no validated SQL".to_string());
            state.next_action = "error".to_string();
            return;
        }
    };

    let role_limits = rt.role_limits(state.role);
    let row_limit = role_limits.max_rows.min(rt.config.default_row_limit);
    let estimated_cost = estimate_cost_cents(row_limit);

    let quota_decision = rt
        .quota
        .check_and_increment_query_quota(&state.user_id, &role_limits)
        .await;
    if !quota_decision.is_allowed() {
        state.error = Some("daily query quota exceeded".to_string());
        state.next_action = "error".to_string();
        return;
    }

    let cost_decision = rt
        .quota
        .check_cost_quota(&state.user_id, &role_limits, estimated_cost)
        .await;
    if !cost_decision.is_allowed() {
        state.error = Some("daily cost quota exceeded".to_string());
        state.next_action = "error".to_string();
        return;
    }

    let key = cache_key(state.database_type, &sql);
    if let Some(cached) = rt.result_cache.get(&key).await {
        if let Ok(result) = serde_json::from_str::<qsql_schemas::ExecutionResult>(&cached) {
            state.push_thinking_step("execute", "Served result from cache");
            state.execution_result = Some(result);
            state.next_action = "format".to_string();
            return;
        }
    }

    state.push_thinking_step("execute", "Dispatching SQL to backend");

    let connection_name = state.target_connection.clone().unwrap_or_else(|| "default".to_string());
    match rt
        .router
        .execute(
            state.database_type,
            &sql,
            &connection_name,
            &state.user_id,
            &state.trace_id.to_string(),
            state.context.as_ref(),
        )
        .await
    {
        Ok(result) => {
            if let Ok(encoded) = serde_json::to_string(&result) {
                rt.result_cache.set(&key, &encoded, rt.config.result_cache_ttl).await;
            }
            rt.quota.track_query_cost(&state.user_id, estimated_cost).await;
            state.extras.remove(EXTRA_LAST_ERROR_RETRYABLE);
            state.extras.remove(EXTRA_LAST_ERROR_CATEGORY);
            state.execution_result = Some(result);
            state.next_action = "format".to_string();
        }
        Err(normalized) => {
            state.extras.insert(
                EXTRA_LAST_ERROR_RETRYABLE.to_string(),
                serde_json::Value::Bool(normalized.retry_strategy.should_retry),
            );
            state.extras.insert(
                EXTRA_LAST_ERROR_CATEGORY.to_string(),
                serde_json::Value::String(format!("{:?}", normalized.category)),
            );
            state.push_thinking_step(
                "execute",
                format!("Execution failed: {}", normalized.user_message),
            );
            state.error = Some(normalized.user_message);
            state.next_action = "error".to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_cost_cents_floors_at_one() {
        assert_eq!(estimate_cost_cents(10), 1);
        assert_eq!(estimate_cost_cents(500), 10);
    }

    #[test]
    fn cache_key_differs_across_backends() {
        let oracle_key = cache_key(qsql_schemas::DatabaseType::Oracle, "select 1");
        let doris_key = cache_key(qsql_schemas::DatabaseType::Doris, "select 1");
        assert_ne!(oracle_key, doris_key);
    }
}
