//! The orchestrator driver (C11), spec §4.11 / §9.
//!
//! Dispatches `QueryState.next_action` to its node function, publishes
//! lifecycle transitions over the [`qsql_state::StatePublisher`], checkpoints
//! after every node, and owns the one piece of control flow no node is
//! trusted with: whether a failed node is retried or treated as terminal.
//! The transition table in spec §9 ("stage -> node_fn -> next_stage") is
//! implemented here as an explicit `match` rather than a literal lookup
//! table — there are no real cycles to model generically, only the bounded
//! retry of a single node (`execute`), so a data-driven table would add
//! indirection without buying anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use qsql_resilient_client::RemoteKv;
use qsql_schemas::{ApprovalStatus, QueryLifecycleState, QueryState, QueryStateEvent};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::nodes::{self, EXTRA_LAST_ERROR_RETRYABLE};
use crate::runtime::Runtime;

/// A cooperative cancellation flag, checked at node-entry boundaries (spec
/// §4.11 point 6: "cancellation is cooperative, checked between nodes, not
/// preemptive").
#[derive(Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOutcome {
    Finished,
    AwaitingApproval,
    Rejected,
    Error,
    Cancelled,
}

pub struct OrchestratorDriver<K: RemoteKv, C: CheckpointStore> {
    runtime: Arc<Runtime<K, C>>,
}

impl<K: RemoteKv, C: CheckpointStore> OrchestratorDriver<K, C> {
    pub fn new(runtime: Arc<Runtime<K, C>>) -> Self {
        Self { runtime }
    }

    /// Runs a freshly constructed [`QueryState`] from `next_action =
    /// "understand"` through to a terminal or awaiting-approval outcome.
    pub async fn start(&self, mut state: QueryState, cancel: &CancelSignal) -> (QueryState, DriverOutcome) {
        self.publish(&state).await;
        let outcome = self.run_loop(&mut state, cancel).await;
        (state, outcome)
    }

    /// Resumes a query that was left at `PendingApproval`. Looks up the
    /// approval record and either continues into `execute` (approved),
    /// transitions to the terminal `Rejected` state, or reports the
    /// approval window as expired.
    pub async fn resume_after_approval(
        &self,
        mut state: QueryState,
        cancel: &CancelSignal,
    ) -> (QueryState, DriverOutcome) {
        let pending = self.runtime.approvals.get(state.query_id).await;
        match pending.map(|p| p.approval_status) {
            Some(ApprovalStatus::Approved) => {
                state.needs_approval = false;
                let _ = state.transition(QueryLifecycleState::Approved);
                self.publish(&state).await;
                state.next_action = "execute".to_string();
            }
            Some(ApprovalStatus::Rejected) => {
                state.error = Some("approval was rejected".to_string());
                let _ = state.transition(QueryLifecycleState::Rejected);
                self.publish(&state).await;
                self.runtime.checkpointer.save(state.query_id, &encode(&state)).await;
                return (state, DriverOutcome::Rejected);
            }
            Some(ApprovalStatus::Expired) | None => {
                state.error = Some("approval window expired or was never recorded".to_string());
                let _ = state.transition(QueryLifecycleState::Error);
                self.publish(&state).await;
                self.runtime.checkpointer.save(state.query_id, &encode(&state)).await;
                return (state, DriverOutcome::Error);
            }
            Some(ApprovalStatus::Pending) => {
                return (state, DriverOutcome::AwaitingApproval);
            }
        }
        let outcome = self.run_loop(&mut state, cancel).await;
        (state, outcome)
    }

    async fn run_loop(&self, state: &mut QueryState, cancel: &CancelSignal) -> DriverOutcome {
        let mut retries_remaining = self.runtime.config.max_node_retries;

        loop {
            if cancel.is_cancelled() {
                state.error = Some("query cancelled".to_string());
                let _ = state.transition(QueryLifecycleState::Error);
                self.publish(state).await;
                self.checkpoint(state).await;
                return DriverOutcome::Cancelled;
            }

            let action = state.next_action.clone();
            self.enter_stage(state, &action).await;

            match action.as_str() {
                "understand" => nodes::understand::run(&self.runtime, state).await,
                "retrieve_context" => nodes::retrieve_context::run(&self.runtime, state).await,
                "generate_hypothesis" => nodes::generate_hypothesis::run(&self.runtime, state).await,
                "generate_sql" => nodes::generate_sql::run(&self.runtime, state).await,
                "validate" => nodes::validate::run(&self.runtime, state).await,
                "execute" => nodes::execute::run(&self.runtime, state).await,
                "format" => nodes::format::run(&self.runtime, state).await,
                "await_approval" => {
                    let _ = state.transition(QueryLifecycleState::PendingApproval);
                    self.publish(state).await;
                    self.checkpoint(state).await;
                    return DriverOutcome::AwaitingApproval;
                }
                "done" => {
                    let _ = state.transition(QueryLifecycleState::Finished);
                    self.publish(state).await;
                    self.checkpoint(state).await;
                    return DriverOutcome::Finished;
                }
                "decompose" => {
                    // Reserved for multi-query decomposition; no node is bound
                    // to it yet, so reaching it is a hard configuration error.
                    state.error = Some("multi-query decomposition is not implemented".to_string());
                    state.next_action = "error".to_string();
                    continue;
                }
                "error" => {
                    let _ = state.transition(QueryLifecycleState::Error);
                    self.publish(state).await;
                    self.checkpoint(state).await;
                    return DriverOutcome::Error;
                }
                other => {
                    state.error = Some(format!("unknown next_action '{other}'"));
                    state.next_action = "error".to_string();
                    continue;
                }
            }

            self.checkpoint(state).await;

            if state.next_action == "error" {
                let retryable = state
                    .extras
                    .get(EXTRA_LAST_ERROR_RETRYABLE)
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);

                if retryable && retries_remaining > 0 && action == "execute" {
                    retries_remaining -= 1;
                    tracing::info!(
                        query_id = %state.query_id,
                        retries_remaining,
                        "retrying transient execute failure"
                    );
                    state.push_thinking_step(
                        "execute",
                        format!("Retrying after transient failure ({retries_remaining} attempt(s) left)"),
                    );
                    state.error = None;
                    state.next_action = "execute".to_string();
                    continue;
                }
            }
        }
    }

    async fn enter_stage(&self, state: &mut QueryState, action: &str) {
        let target = match action {
            "understand" | "retrieve_context" | "generate_hypothesis" => {
                Some(QueryLifecycleState::Planning)
            }
            "generate_sql" | "validate" => Some(QueryLifecycleState::Prepared),
            "execute" => Some(QueryLifecycleState::Executing),
            _ => None,
        };
        if let Some(target) = target {
            if state.current_stage != target && state.current_stage.can_transition_to(target) {
                let _ = state.transition(target);
                self.publish(state).await;
            }
        }
    }

    async fn publish(&self, state: &QueryState) {
        let mut event = QueryStateEvent::new(state.query_id, state.current_stage);
        event.thinking_steps = Some(
            state
                .llm_metadata
                .thinking_steps
                .iter()
                .map(|s| s.note.clone())
                .collect(),
        );
        if let Some(sql) = &state.sql_query {
            event.sql = Some(sql.clone());
        }
        if let Some(formatted) = &state.formatted_result {
            event.result = serde_json::to_value(formatted).ok();
            event.discoveries = Some(formatted.discoveries.clone());
        }
        if let Some(error) = &state.error {
            event
                .metadata
                .insert("error".to_string(), serde_json::Value::String(error.clone()));
        }
        self.runtime.state_publisher.update(event).await;
    }

    async fn checkpoint(&self, state: &QueryState) {
        self.runtime.checkpointer.save(state.query_id, &encode(state)).await;
    }
}

fn encode(state: &QueryState) -> String {
    serde_json::to_string(state).unwrap_or_default()
}

/// Restores a [`QueryState`] from a checkpoint for a given id, if one is on
/// record.
pub async fn load_checkpoint<K: RemoteKv, C: CheckpointStore>(
    runtime: &Runtime<K, C>,
    query_id: Uuid,
) -> Option<QueryState> {
    let raw = runtime.checkpointer.load(query_id).await?;
    serde_json::from_str(&raw).ok()
}
