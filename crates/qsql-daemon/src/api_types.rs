//! Request and response types for all qsql-daemon HTTP endpoints.
//!
//! `Serialize + Deserialize` so Axum can JSON-encode/decode them directly;
//! no business logic lives here.

use qsql_schemas::{DatabaseType, QueryLifecycleState, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// POST /v1/queries/submit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitQueryRequest {
    pub user_id: String,
    pub session_id: String,
    pub user_query: String,
    pub database_type: DatabaseType,
    pub role: Role,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitQueryResponse {
    pub query_id: Uuid,
    pub current_stage: QueryLifecycleState,
    pub needs_approval: bool,
    pub sql_query: Option<String>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// POST /v1/queries/:id/approve  and  /reject
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub approver: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecisionResponse {
    pub query_id: Uuid,
    pub current_stage: QueryLifecycleState,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// GET /v1/queries/:id/state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRefusedResponse {
    pub error: String,
    /// Which gate refused the request, e.g. "rate_limited".
    pub gate: String,
    pub retry_after_seconds: Option<u64>,
}
