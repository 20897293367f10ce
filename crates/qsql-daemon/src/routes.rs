//! Axum router and all HTTP handlers for qsql-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are `pub(crate)` so scenario tests under
//! `tests/` can compose the router directly, the same visibility the teacher
//! uses for its own route handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use qsql_approval::{binding, ApprovalError};
use qsql_orchestrator::driver::load_checkpoint;
use qsql_orchestrator::{CancelSignal, DriverOutcome};
use qsql_schemas::{ApprovalBinding, QueryState, Role};
use tracing::info;
use uuid::Uuid;

use crate::api_types::{
    ApprovalDecisionResponse, ApproveRequest, ErrorResponse, GateRefusedResponse, HealthResponse,
    RejectRequest, SubmitQueryRequest, SubmitQueryResponse,
};
use crate::state::{uptime_secs, AppState};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/queries/submit", post(submit_query))
        .route("/v1/queries/:id/approve", post(approve_query))
        .route("/v1/queries/:id/reject", post(reject_query))
        .route("/v1/queries/:id/state", get(query_state))
        .route("/v1/queries/:id/stream", get(query_stream))
        .with_state(state)
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::Guest => "guest",
        Role::Viewer => "viewer",
        Role::Analyst => "analyst",
        Role::Developer => "developer",
        Role::Admin => "admin",
    }
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
            uptime_secs: uptime_secs(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/queries/submit
// ---------------------------------------------------------------------------

pub(crate) async fn submit_query(
    State(st): State<Arc<AppState>>,
    Json(req): Json<SubmitQueryRequest>,
) -> Response {
    let limits = st.runtime.role_limits(req.role);
    let rate_status = st
        .rate_limiter
        .check_rate_limit(&req.user_id, "/v1/queries/submit", req.role)
        .await;
    if !rate_status.allowed {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(GateRefusedResponse {
                error: "rate limit exceeded".to_string(),
                gate: "rate_limited".to_string(),
                retry_after_seconds: rate_status.retry_after_seconds,
            }),
        )
            .into_response();
    }

    let mut query_state =
        QueryState::new(&req.user_id, &req.session_id, &req.user_query, req.database_type, req.role);
    if let Some(ip) = &req.ip_address {
        query_state
            .extras
            .insert("ip_address".to_string(), serde_json::Value::String(ip.clone()));
    }
    if let Some(ua) = &req.user_agent {
        query_state
            .extras
            .insert("user_agent".to_string(), serde_json::Value::String(ua.clone()));
    }
    query_state
        .extras
        .insert("role_row_limit".to_string(), serde_json::json!(limits.max_rows));

    let query_id = query_state.query_id;
    let cancel = CancelSignal::new();
    st.register_cancel_signal(query_id, cancel.clone()).await;

    {
        let mut audit = st.audit.lock().await;
        let _ = qsql_audit::log_query_execution(
            &mut audit,
            &req.user_id,
            role_str(req.role),
            &req.user_query,
            true,
            None,
            None,
            None,
            None,
            Some(&req.session_id),
        );
    }

    let (final_state, outcome) = st.driver.start(query_state, &cancel).await;
    if outcome != DriverOutcome::AwaitingApproval {
        st.take_cancel_signal(query_id).await;
    }

    info!(query_id = %query_id, ?outcome, "query submitted");

    (
        StatusCode::OK,
        Json(SubmitQueryResponse {
            query_id,
            current_stage: final_state.current_stage,
            needs_approval: final_state.needs_approval,
            sql_query: final_state.sql_query,
            error: final_state.error,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/queries/:id/approve
// ---------------------------------------------------------------------------

pub(crate) async fn approve_query(
    State(st): State<Arc<AppState>>,
    Path(query_id): Path<Uuid>,
    Json(req): Json<ApproveRequest>,
) -> Response {
    let Some(query_state) = load_checkpoint(&*st.runtime, query_id).await else {
        return (StatusCode::NOT_FOUND, Json(ErrorResponse { error: "query not found".to_string() }))
            .into_response();
    };

    let binding = approval_binding(&st, &query_state, &req.ip_address, &req.user_agent);
    let outcome = st
        .runtime
        .approvals
        .mark_approved(
            query_id,
            &query_state.sql_query.clone().unwrap_or_default(),
            &req.approver,
            &req.reason,
            BTreeMap::new(),
            &st.runtime.config.approval_hmac_secret,
            &binding,
            st.runtime.config.ip_tolerance,
        )
        .await;

    if let Err(err) = outcome {
        return approval_error_response(err);
    }

    {
        let mut audit = st.audit.lock().await;
        let _ = qsql_audit::log_query_approval(
            &mut audit,
            &req.approver,
            role_str(query_state.role),
            &query_id.to_string(),
            true,
            Some(&req.reason),
        );
    }

    let cancel = st.cancel_signal(query_id).await.unwrap_or_default();
    let (final_state, driver_outcome) = st.driver.resume_after_approval(query_state, &cancel).await;
    if driver_outcome != DriverOutcome::AwaitingApproval {
        st.take_cancel_signal(query_id).await;
    }

    (
        StatusCode::OK,
        Json(ApprovalDecisionResponse {
            query_id,
            current_stage: final_state.current_stage,
            error: final_state.error,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/queries/:id/reject
// ---------------------------------------------------------------------------

pub(crate) async fn reject_query(
    State(st): State<Arc<AppState>>,
    Path(query_id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> Response {
    let Some(query_state) = load_checkpoint(&*st.runtime, query_id).await else {
        return (StatusCode::NOT_FOUND, Json(ErrorResponse { error: "query not found".to_string() }))
            .into_response();
    };

    let binding = approval_binding(&st, &query_state, &req.ip_address, &req.user_agent);
    let outcome = st
        .runtime
        .approvals
        .mark_rejected(query_id, &st.runtime.config.approval_hmac_secret, &binding, st.runtime.config.ip_tolerance)
        .await;

    if let Err(err) = outcome {
        return approval_error_response(err);
    }

    {
        let mut audit = st.audit.lock().await;
        let _ = qsql_audit::log_query_approval(
            &mut audit,
            &query_state.user_id,
            role_str(query_state.role),
            &query_id.to_string(),
            false,
            Some(&req.reason),
        );
    }

    let cancel = st.take_cancel_signal(query_id).await.unwrap_or_default();
    let (final_state, _) = st.driver.resume_after_approval(query_state, &cancel).await;

    (
        StatusCode::OK,
        Json(ApprovalDecisionResponse {
            query_id,
            current_stage: final_state.current_stage,
            error: final_state.error,
        }),
    )
        .into_response()
}

/// Reconstructs the binding that was recorded at query submission time from
/// the checkpointed `QueryState` plus the request's own ip/user-agent, so the
/// fingerprint comparison in `validate_approval` is against what the caller
/// actually presents now, not a forged value.
fn approval_binding(
    st: &AppState,
    state: &QueryState,
    ip_address: &Option<String>,
    user_agent: &Option<String>,
) -> ApprovalBinding {
    binding::make_binding(
        &st.runtime.config.approval_hmac_secret,
        &state.session_id,
        &state.user_id,
        ip_address.as_deref().unwrap_or_default(),
        user_agent.as_deref().unwrap_or_default(),
    )
}

fn approval_error_response(err: ApprovalError) -> Response {
    let (status, message) = match err {
        ApprovalError::NotFound => (StatusCode::NOT_FOUND, "no pending approval for this query".to_string()),
        ApprovalError::Expired => (StatusCode::GONE, "approval window expired".to_string()),
        ApprovalError::BindingRejected(reason) => (StatusCode::FORBIDDEN, reason),
    };
    (status, Json(ErrorResponse { error: message })).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/queries/:id/state
// ---------------------------------------------------------------------------

pub(crate) async fn query_state(
    State(st): State<Arc<AppState>>,
    Path(query_id): Path<Uuid>,
) -> Response {
    match st.runtime.state_publisher.current(query_id).await {
        Some(event) => (StatusCode::OK, Json(event)).into_response(),
        None => (StatusCode::NOT_FOUND, Json(ErrorResponse { error: "no state recorded for this query".to_string() }))
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/queries/:id/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn query_stream(
    State(st): State<Arc<AppState>>,
    Path(query_id): Path<Uuid>,
) -> Response {
    let events = st.runtime.state_publisher.subscribe(query_id).await;
    Sse::new(event_stream(events)).keep_alive(KeepAlive::new()).into_response()
}

fn event_stream(
    events: std::pin::Pin<Box<dyn Stream<Item = qsql_schemas::QueryStateEvent> + Send>>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    events.map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().event("state").data(data))
    })
}
