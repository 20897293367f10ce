//! `QueryState` and its sub-structs, spec §3 and §9 "Dynamic dict state bags".
//!
//! Replaces a loose dictionary-based state bag with one tagged record and
//! explicit sub-structs per stage; unknown-keyed extensions live under a
//! typed `extras` map rather than free-form keys on the record itself.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lifecycle::QueryLifecycleState;
use crate::role::{DatabaseType, Role, RiskLevel};

/// Structured classification produced by the `understand` node (C10).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Intent {
    pub query_type: String,
    pub complexity: String,
    pub domain: String,
    pub temporal: bool,
    pub expected_cardinality: String,
    pub tables: Vec<String>,
    pub entities: Vec<String>,
    pub aggregations: Vec<String>,
    pub filters: Vec<String>,
    pub joins_count: u32,
    /// "llm" or "fallback" — lets observability distinguish the
    /// keyword-pattern fallback path from an LLM-produced classification.
    pub source: String,
}

/// Schema snapshot returned by the schema resolver (C9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, Vec<ColumnMapping>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
}

/// LLM-emitted query plan from `generate_hypothesis` (C10).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hypothesis {
    pub main_table: String,
    pub additional_tables: Vec<String>,
    pub joins: Vec<String>,
    pub filters: Vec<String>,
    pub aggregations: Vec<String>,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
    pub expected_output: String,
    pub grain: String,
    /// "high" | "medium" | "low"
    pub confidence: String,
    pub risks: Vec<String>,
    /// Set when JSON parsing of the LLM response failed and the node
    /// degraded to a plain-text plan (spec §4.10 generate_hypothesis).
    pub degraded_to_text: bool,
}

/// Outcome of the SQL validator (C6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub risk_level: Option<RiskLevel>,
    pub requires_approval: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub sandboxed_sql: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormattedResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub discoveries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingStep {
    pub stage: String,
    pub note: String,
    pub at: DateTime<Utc>,
}

/// Per-stage append-only metadata carried alongside the state. Mirrors
/// `llm_metadata.thinking_steps` from spec §3.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmMetadata {
    pub thinking_steps: Vec<ThinkingStep>,
    pub provider_used: Option<String>,
}

/// The mutable workflow record for one request (spec §3 `QueryState`).
///
/// Exclusive writer is the orchestrator driver (C11) for the lifetime of the
/// query; every other consumer (state publisher, approval store) only ever
/// sees read-only snapshots, per spec §3 "Ownership summary" and §5
/// "Shared-resource policy".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryState {
    // Identity
    pub query_id: Uuid,
    pub trace_id: Uuid,
    pub user_id: String,
    pub session_id: String,
    pub correlation_id: Uuid,
    pub role: Role,

    // Inputs
    pub user_query: String,
    pub database_type: DatabaseType,
    pub target_connection: Option<String>,

    // Intermediate
    pub intent: Option<Intent>,
    pub hypothesis: Option<Hypothesis>,
    pub context: Option<SchemaSnapshot>,
    pub sql_query: Option<String>,
    pub sql_confidence: Option<u8>,
    pub column_mappings: Vec<ColumnMapping>,
    pub validation_result: Option<ValidationResult>,

    // Outputs
    pub execution_result: Option<ExecutionResult>,
    pub formatted_result: Option<FormattedResult>,

    // Control
    pub current_stage: QueryLifecycleState,
    pub next_action: String,
    pub needs_approval: bool,
    pub error: Option<String>,
    pub messages: Vec<Message>,
    pub llm_metadata: LlmMetadata,

    /// Typed extension point for unforeseen per-stage data, replacing a
    /// free-form dict bag (spec §9 "Dynamic dict state bags").
    pub extras: BTreeMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueryState {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        user_query: impl Into<String>,
        database_type: DatabaseType,
        role: Role,
    ) -> Self {
        let now = Utc::now();
        Self {
            query_id: Uuid::new_v4(),
            trace_id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            correlation_id: Uuid::new_v4(),
            role,
            user_query: user_query.into(),
            database_type,
            target_connection: None,
            intent: None,
            hypothesis: None,
            context: None,
            sql_query: None,
            sql_confidence: None,
            column_mappings: Vec::new(),
            validation_result: None,
            execution_result: None,
            formatted_result: None,
            current_stage: QueryLifecycleState::Received,
            next_action: "understand".to_string(),
            needs_approval: false,
            error: None,
            messages: Vec::new(),
            llm_metadata: LlmMetadata::default(),
            extras: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_thinking_step(&mut self, stage: &str, note: impl Into<String>) {
        self.llm_metadata.thinking_steps.push(ThinkingStep {
            stage: stage.to_string(),
            note: note.into(),
            at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    pub fn push_message(&mut self, role: &str, content: impl Into<String>) {
        self.messages.push(Message {
            role: role.to_string(),
            content: content.into(),
            at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    /// Transition `current_stage`, enforcing the lifecycle DAG (spec §5(a)).
    pub fn transition(&mut self, next: QueryLifecycleState) -> Result<(), String> {
        if !self.current_stage.can_transition_to(next) {
            return Err(format!(
                "illegal transition {:?} -> {:?}",
                self.current_stage, next
            ));
        }
        self.current_stage = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
