//! Node 5: `validate`, spec §4.10 / §4.6.
//!
//! Runs the generated SQL through the C6 validation pipeline. A failure sets
//! a terminal error; a pass that `requires_approval` files a pending
//! approval (C8) and routes to `await_approval` instead of `execute`.

use qsql_approval::binding::make_binding;
use qsql_resilient_client::RemoteKv;
use qsql_schemas::QueryState;

use crate::checkpoint::CheckpointStore;
use crate::nodes::{EXTRA_IP_ADDRESS, EXTRA_USER_AGENT};
use crate::runtime::Runtime;

pub async fn run<K: RemoteKv, C: CheckpointStore>(rt: &Runtime<K, C>, state: &mut QueryState) {
    let span = tracing::info_span!("node.validate", query_id = %state.query_id);
    let _enter = span.enter();

    let sql = match &state.sql_query {
        Some(sql) => sql.clone(),
        None => {
            state.error = Some("validate reached with no generated SQL".to_string());
            state.next_action = "error".to_string();
            return;
        }
    };

    state.push_thinking_step("validate", "Validating generated SQL against policy");

    let dialect = rt.dialect_for(state.database_type);
    let role_limits = rt.role_limits(state.role);
    let row_limit = role_limits.max_rows.min(rt.config.default_row_limit);

    let result = qsql_validator::validate(&sql, dialect, dialect, &rt.risk_policy, &role_limits, row_limit);

    if !result.errors.is_empty() {
        state.push_thinking_step(
            "validate",
            format!("Validation rejected the statement: {}", result.errors.join("; ")),
        );
        state.error = Some(result.errors.join("; "));
        state.validation_result = Some(result);
        state.next_action = "error".to_string();
        return;
    }

    let requires_approval = result.requires_approval;
    state.validation_result = Some(result);

    if requires_approval {
        let ip_address = extra_string(state, EXTRA_IP_ADDRESS);
        let user_agent = extra_string(state, EXTRA_USER_AGENT);
        let binding = make_binding(
            &rt.config.approval_hmac_secret,
            &state.session_id,
            &state.user_id,
            &ip_address,
            &user_agent,
        );

        rt.approvals
            .save_pending(
                state.query_id,
                &sql,
                dialect,
                &rt.risk_policy,
                &role_limits,
                row_limit,
                binding,
            )
            .await;

        state.needs_approval = true;
        state.push_thinking_step("validate", "Statement flagged for human approval");
        state.next_action = "await_approval".to_string();
    } else {
        state.needs_approval = false;
        state.next_action = "execute".to_string();
    }
}

fn extra_string(state: &QueryState, key: &str) -> String {
    state
        .extras
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}
