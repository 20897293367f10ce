//! In-process scenario tests for qsql-daemon's HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Each test calls `routes::build_router` and drives it via
//! `tower::ServiceExt::oneshot` — no network I/O required, same pattern the
//! teacher uses for its own daemon route scenario tests.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use qsql_daemon::{routes, state::AppState};
use qsql_testkit::{AlwaysFailsLlm, FixedSchemaSource, ScriptedLlm, ScriptedReply};
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Builds an `AppState` with a fixed two-column schema source standing in
/// for a live catalog adapter -- this daemon binary wires none by default
/// (spec §1), but these scenario tests need `retrieve_context` to resolve
/// successfully to exercise the stages past it over HTTP.
async fn make_state(llm: Box<dyn qsql_llm::LlmProvider>) -> (Arc<AppState>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let audit_path = dir.path().join("audit.jsonl");
    let state = AppState::new_with_schema_source(llm, Box::new(FixedSchemaSource), audit_path.to_str().unwrap())
        .await
        .expect("AppState::new_with_schema_source");
    (Arc::new(state), dir)
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp.into_body().collect().await.expect("body collect failed").to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn json_body(value: serde_json::Value) -> axum::body::Body {
    axum::body::Body::from(value.to_string())
}

fn scripted_llm_no_approval() -> ScriptedLlm {
    ScriptedLlm::new(
        vec![
            ScriptedReply {
                system_prompt_contains: "intent classifier",
                reply: r#"{"query_type": "aggregation", "complexity": "medium", "domain": "sales",
                   "temporal": false, "expected_cardinality": "summary", "tables": ["ORDERS"],
                   "entities": [], "aggregations": ["sum"], "filters": [], "joins_count": 0}"#
                    .to_string(),
            },
            ScriptedReply {
                system_prompt_contains: "query-planning assistant",
                reply: r#"{"main_table": "ORDERS", "additional_tables": [], "joins": [], "filters": [],
                   "aggregations": ["sum(amount)"], "group_by": ["region"], "order_by": [],
                   "limit": 100, "expected_output": "total amount by region", "grain": "region",
                   "confidence": "high", "risks": []}"#
                    .to_string(),
            },
        ],
        "```sql\nSELECT region, SUM(amount) AS total FROM orders GROUP BY region\n```",
    )
}

fn scripted_llm_sensitive_table() -> ScriptedLlm {
    ScriptedLlm::new(
        vec![
            ScriptedReply {
                system_prompt_contains: "intent classifier",
                reply: r#"{"query_type": "lookup", "complexity": "simple", "domain": "hr",
                   "temporal": false, "expected_cardinality": "row", "tables": ["SALARIES"],
                   "entities": [], "aggregations": [], "filters": [], "joins_count": 0}"#
                    .to_string(),
            },
            ScriptedReply {
                system_prompt_contains: "query-planning assistant",
                reply: r#"{"main_table": "SALARIES", "additional_tables": [], "joins": [], "filters": [],
                   "aggregations": [], "group_by": [], "order_by": [], "limit": 100,
                   "expected_output": "salary rows", "grain": "row", "confidence": "high", "risks": []}"#
                    .to_string(),
            },
        ],
        "```sql\nSELECT * FROM SALARIES\n```",
    )
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let (st, _dir) = make_state(Box::new(AlwaysFailsLlm::default())).await;
    let router = routes::build_router(st);
    let req = Request::builder()
        .method("GET")
        .uri("/v1/health")
        .body(axum::body::Body::empty())
        .unwrap();

    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "qsql-daemon");
}

// ---------------------------------------------------------------------------
// POST /v1/queries/submit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_query_reaches_terminal_error_with_no_adapters_configured() {
    let (st, _dir) = make_state(Box::new(scripted_llm_no_approval())).await;
    let router = routes::build_router(Arc::clone(&st));

    let body = json_body(serde_json::json!({
        "user_id": "user-1",
        "session_id": "session-1",
        "user_query": "total revenue by region",
        "database_type": "oracle",
        "role": "analyst",
    }));
    let req = Request::builder()
        .method("POST")
        .uri("/v1/queries/submit")
        .header("content-type", "application/json")
        .body(body)
        .unwrap();

    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    // No Oracle pool is wired for this standalone process, so the pipeline
    // reaches SQL generation and then fails at execution — still exercises
    // the full submit -> understand -> ... -> execute path over HTTP.
    assert!(json["sql_query"].is_string());
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn submit_query_on_sensitive_table_requires_approval() {
    let (st, _dir) = make_state(Box::new(scripted_llm_sensitive_table())).await;
    let router = routes::build_router(Arc::clone(&st));

    let body = json_body(serde_json::json!({
        "user_id": "user-2",
        "session_id": "session-2",
        "user_query": "show me salaries",
        "database_type": "oracle",
        "role": "analyst",
    }));
    let req = Request::builder()
        .method("POST")
        .uri("/v1/queries/submit")
        .header("content-type", "application/json")
        .body(body)
        .unwrap();

    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["needs_approval"], true);
    assert_eq!(json["current_stage"], "PENDING_APPROVAL");
}

#[tokio::test]
async fn submit_query_state_is_retrievable_after_submit() {
    let (st, _dir) = make_state(Box::new(scripted_llm_no_approval())).await;
    let router = routes::build_router(Arc::clone(&st));

    let body = json_body(serde_json::json!({
        "user_id": "user-3",
        "session_id": "session-3",
        "user_query": "total revenue by region",
        "database_type": "oracle",
        "role": "analyst",
    }));
    let req = Request::builder()
        .method("POST")
        .uri("/v1/queries/submit")
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let (_, submit_body) = call(router, req).await;
    let query_id = parse_json(submit_body)["query_id"].as_str().unwrap().to_string();

    let state_req = Request::builder()
        .method("GET")
        .uri(format!("/v1/queries/{query_id}/state"))
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, body) = call(routes::build_router(Arc::clone(&st)), state_req).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["query_id"], query_id);
}

// ---------------------------------------------------------------------------
// POST /v1/queries/:id/approve
// ---------------------------------------------------------------------------

#[tokio::test]
async fn approve_with_matching_binding_resumes_to_execute() {
    let (st, _dir) = make_state(Box::new(scripted_llm_sensitive_table())).await;

    let submit_body = json_body(serde_json::json!({
        "user_id": "user-4",
        "session_id": "session-4",
        "user_query": "show me salaries",
        "database_type": "oracle",
        "role": "analyst",
        "ip_address": "10.0.0.1",
        "user_agent": "pytest-agent",
    }));
    let submit_req = Request::builder()
        .method("POST")
        .uri("/v1/queries/submit")
        .header("content-type", "application/json")
        .body(submit_body)
        .unwrap();
    let (_, submit_resp) = call(routes::build_router(Arc::clone(&st)), submit_req).await;
    let submit_json = parse_json(submit_resp);
    assert_eq!(submit_json["needs_approval"], true);
    let query_id = submit_json["query_id"].as_str().unwrap().to_string();

    let approve_body = json_body(serde_json::json!({
        "approver": "admin-1",
        "reason": "reviewed, acceptable",
        "ip_address": "10.0.0.1",
        "user_agent": "pytest-agent",
    }));
    let approve_req = Request::builder()
        .method("POST")
        .uri(format!("/v1/queries/{query_id}/approve"))
        .header("content-type", "application/json")
        .body(approve_body)
        .unwrap();
    let (status, body) = call(routes::build_router(Arc::clone(&st)), approve_req).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    // No Oracle pool wired, so resumption still fails at execute -- but the
    // approval itself must succeed and the driver must leave PENDING_APPROVAL.
    assert_eq!(json["current_stage"], "ERROR");
}

#[tokio::test]
async fn approve_with_mismatched_ip_is_rejected() {
    let (st, _dir) = make_state(Box::new(scripted_llm_sensitive_table())).await;

    let submit_body = json_body(serde_json::json!({
        "user_id": "user-5",
        "session_id": "session-5",
        "user_query": "show me salaries",
        "database_type": "oracle",
        "role": "analyst",
        "ip_address": "10.0.0.1",
        "user_agent": "pytest-agent",
    }));
    let submit_req = Request::builder()
        .method("POST")
        .uri("/v1/queries/submit")
        .header("content-type", "application/json")
        .body(submit_body)
        .unwrap();
    let (_, submit_resp) = call(routes::build_router(Arc::clone(&st)), submit_req).await;
    let query_id = parse_json(submit_resp)["query_id"].as_str().unwrap().to_string();

    // A different IP outside the /24 subnet tolerance, from an attacker
    // that forwarded the query_id but not the original session.
    let approve_body = json_body(serde_json::json!({
        "approver": "admin-1",
        "reason": "reviewed",
        "ip_address": "203.0.113.9",
        "user_agent": "pytest-agent",
    }));
    let approve_req = Request::builder()
        .method("POST")
        .uri(format!("/v1/queries/{query_id}/approve"))
        .header("content-type", "application/json")
        .body(approve_body)
        .unwrap();
    let (status, body) = call(routes::build_router(Arc::clone(&st)), approve_req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let json = parse_json(body);
    assert!(json["error"].as_str().unwrap_or_default().len() > 0);
}

#[tokio::test]
async fn approve_unknown_query_returns_404() {
    let (st, _dir) = make_state(Box::new(AlwaysFailsLlm::default())).await;
    let approve_body = json_body(serde_json::json!({
        "approver": "admin-1",
        "reason": "n/a",
    }));
    let req = Request::builder()
        .method("POST")
        .uri(format!("/v1/queries/{}/approve", uuid::Uuid::new_v4()))
        .header("content-type", "application/json")
        .body(approve_body)
        .unwrap();
    let (status, _) = call(routes::build_router(st), req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// POST /v1/queries/:id/reject
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reject_with_matching_binding_sets_rejected_terminal_state() {
    let (st, _dir) = make_state(Box::new(scripted_llm_sensitive_table())).await;

    let submit_body = json_body(serde_json::json!({
        "user_id": "user-6",
        "session_id": "session-6",
        "user_query": "show me salaries",
        "database_type": "oracle",
        "role": "analyst",
        "ip_address": "10.0.0.2",
        "user_agent": "pytest-agent",
    }));
    let submit_req = Request::builder()
        .method("POST")
        .uri("/v1/queries/submit")
        .header("content-type", "application/json")
        .body(submit_body)
        .unwrap();
    let (_, submit_resp) = call(routes::build_router(Arc::clone(&st)), submit_req).await;
    let query_id = parse_json(submit_resp)["query_id"].as_str().unwrap().to_string();

    let reject_body = json_body(serde_json::json!({
        "reason": "unnecessary access to payroll data",
        "ip_address": "10.0.0.2",
        "user_agent": "pytest-agent",
    }));
    let reject_req = Request::builder()
        .method("POST")
        .uri(format!("/v1/queries/{query_id}/reject"))
        .header("content-type", "application/json")
        .body(reject_body)
        .unwrap();
    let (status, body) = call(routes::build_router(Arc::clone(&st)), reject_req).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["current_stage"], "REJECTED");
}

// ---------------------------------------------------------------------------
// Unknown routes return 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let (st, _dir) = make_state(Box::new(AlwaysFailsLlm::default())).await;
    let router = routes::build_router(st);
    let req = Request::builder()
        .method("GET")
        .uri("/v1/does_not_exist")
        .body(axum::body::Body::empty())
        .unwrap();

    let (status, _) = call(router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
