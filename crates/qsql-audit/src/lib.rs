//! qsql-audit — append-only, hash-chained audit trail (ambient stack,
//! ethics/compliance surface referenced throughout SPEC_FULL's security
//! model).
//!
//! The hash-chain writer is ported near-verbatim from `mqk-audit`: one JSON
//! Lines file, each event's `hash_self` computed over the canonical
//! (key-sorted) JSON of the event with `hash_self` itself blanked out, and
//! `hash_prev` pinned to the previous event's `hash_self` — so truncating or
//! editing any line breaks every hash after it. `AuditAction` / `AuditEntry`
//! / the convenience loggers (`log_query_execution`, `log_query_approval`,
//! ...) and `fingerprint_query` are grounded on
//! `original_source/backend/app/core/audit.py`'s `AuditAction` enum and
//! `audit_query_execution` / `audit_query_approval` / `audit_config_change`
//! helpers, adapted from Redis-backed storage to the JSONL ledger above —
//! this workspace already has a durable event log in C1-C15's `RemoteKv`
//! surfaces, so there's no need for a second, parallel Redis-sorted-set
//! index; `scan_entries` does the equivalent lookup by reading the ledger.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Taxonomy of actions that get an audit entry. Mirrors
/// `original_source`'s `AuditAction`, trimmed to what this workspace's
/// modules actually emit (no generic admin user-management actions — this
/// system has no user-management surface of its own).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AuthLogin,
    AuthFailed,
    QuerySubmit,
    QueryExecute,
    QueryApprove,
    QueryReject,
    QueryView,
    SchemaView,
    ConfigUpdate,
    HealthCheck,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AuthLogin => "auth.login",
            AuditAction::AuthFailed => "auth.failed",
            AuditAction::QuerySubmit => "query.submit",
            AuditAction::QueryExecute => "query.execute",
            AuditAction::QueryApprove => "query.approve",
            AuditAction::QueryReject => "query.reject",
            AuditAction::QueryView => "query.view",
            AuditAction::SchemaView => "schema.view",
            AuditAction::ConfigUpdate => "config.update",
            AuditAction::HealthCheck => "health_check",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// One audit event as written to the ledger. `hash_prev`/`hash_self` are
/// `None` until the writer's hash chain computes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub action: AuditAction,
    pub user: String,
    pub user_role: Option<String>,
    pub severity: AuditSeverity,
    pub success: bool,
    pub resource: Option<String>,
    pub resource_id: Option<String>,
    pub details: Value,
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Append-only, hash-chained audit writer. One event per JSON line.
pub struct AuditWriter {
    path: PathBuf,
    last_hash: Option<String>,
    seq: u64,
}

impl AuditWriter {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create_dir_all {parent:?}"))?;
        }
        Ok(Self {
            path,
            last_hash: None,
            seq: 0,
        })
    }

    /// Resumes an existing ledger: pass the last line's `hash_self` and the
    /// number of events already on disk so freshly appended events chain
    /// onto it correctly after a daemon restart.
    pub fn resume(path: impl AsRef<Path>, last_hash: Option<String>, seq: u64) -> Result<Self> {
        let mut writer = Self::new(path)?;
        writer.last_hash = last_hash;
        writer.seq = seq;
        Ok(writer)
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &mut self,
        action: AuditAction,
        user: &str,
        user_role: Option<&str>,
        severity: AuditSeverity,
        success: bool,
        resource: Option<&str>,
        resource_id: Option<&str>,
        details: Value,
        request_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<AuditEvent> {
        let event_id = derive_event_id(self.last_hash.as_deref(), &details, self.seq);
        self.seq += 1;

        let mut ev = AuditEvent {
            event_id,
            ts_utc: Utc::now(),
            action,
            user: user.to_string(),
            user_role: user_role.map(str::to_string),
            severity,
            success,
            resource: resource.map(str::to_string),
            resource_id: resource_id.map(str::to_string),
            details,
            request_id: request_id.map(str::to_string),
            session_id: session_id.map(str::to_string),
            hash_prev: None,
            hash_self: None,
        };

        ev.hash_prev = self.last_hash.clone();
        let self_hash = compute_event_hash(&ev)?;
        ev.hash_self = Some(self_hash.clone());
        self.last_hash = Some(self_hash);

        let line = canonical_json_line(&ev)?;
        append_line(&self.path, &line)?;

        Ok(ev)
    }
}

/// Deterministic event id derived from chain state, not RNG: the same
/// prefix + payload + sequence number always yields the same id, which
/// keeps replays and resumed-ledger tests reproducible.
fn derive_event_id(prev_hash: Option<&str>, details: &Value, seq: u64) -> Uuid {
    let namespace = Uuid::NAMESPACE_OID;
    let material = format!("{}:{}:{seq}", prev_hash.unwrap_or(""), details);
    Uuid::new_v5(&namespace, material.as_bytes())
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {path:?}"))?;
    f.write_all(line.as_bytes()).context("write audit line")?;
    f.write_all(b"\n").context("write newline")?;
    Ok(())
}

fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit event")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("stringify audit event")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Hashed over the canonical JSON of the event with `hash_self` blanked,
/// so the hash never refers to itself.
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;
    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content =
        fs::read_to_string(path.as_ref()).with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let ev: AuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit event at line {}", i + 1))?;
        line_count += 1;

        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!("hash_prev mismatch: expected {prev_hash:?}, got {:?}", ev.hash_prev),
            });
        }
        if let Some(ref claimed) = ev.hash_self {
            let recomputed = compute_event_hash(&ev)?;
            if *claimed != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
                });
            }
        }
        prev_hash = ev.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: line_count })
}

/// Scans a ledger file for entries matching a predicate, newest first.
/// Replaces the original's Redis sorted-set indexes (`zrevrange` by user /
/// by action) — this ledger has no secondary index, so lookups are a
/// linear scan, acceptable for the append-only compliance log this is.
pub fn scan_entries(
    path: impl AsRef<Path>,
    limit: usize,
    matches: impl Fn(&AuditEvent) -> bool,
) -> Result<Vec<AuditEvent>> {
    let content = match fs::read_to_string(path.as_ref()) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).context("read audit log"),
    };

    let mut out: Vec<AuditEvent> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str::<AuditEvent>(l).ok())
        .filter(|ev| matches(ev))
        .collect();

    out.reverse();
    out.truncate(limit);
    Ok(out)
}

/// SHA-256 fingerprint of a normalized SQL string, truncated to 16 hex
/// chars — used to group identical/near-identical queries in the ledger
/// without storing the full query text as the resource id.
pub fn fingerprint_query(sql: &str) -> String {
    let normalized: String = sql.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Convenience wrapper: audit a completed or failed query execution.
#[allow(clippy::too_many_arguments)]
pub fn log_query_execution(
    writer: &mut AuditWriter,
    user: &str,
    user_role: &str,
    sql: &str,
    success: bool,
    execution_time_ms: Option<u64>,
    row_count: Option<usize>,
    error: Option<&str>,
    request_id: Option<&str>,
    session_id: Option<&str>,
) -> Result<AuditEvent> {
    let fingerprint = fingerprint_query(sql);
    let truncated: String = sql.chars().take(500).collect();
    let mut details = serde_json::json!({
        "sql_query": truncated,
        "query_fingerprint": fingerprint,
        "execution_time_ms": execution_time_ms,
        "row_count": row_count,
    });
    if let Some(e) = error {
        details["error"] = Value::String(e.to_string());
    }

    writer.append(
        AuditAction::QueryExecute,
        user,
        Some(user_role),
        if success { AuditSeverity::Info } else { AuditSeverity::Error },
        success,
        Some("sql_query"),
        Some(&fingerprint),
        details,
        request_id,
        session_id,
    )
}

/// Convenience wrapper: audit an approval decision (C8).
pub fn log_query_approval(
    writer: &mut AuditWriter,
    user: &str,
    user_role: &str,
    query_id: &str,
    approved: bool,
    reason: Option<&str>,
) -> Result<AuditEvent> {
    let action = if approved { AuditAction::QueryApprove } else { AuditAction::QueryReject };
    let details = match reason {
        Some(r) => serde_json::json!({ "reason": r }),
        None => serde_json::json!({}),
    };
    writer.append(
        action,
        user,
        Some(user_role),
        AuditSeverity::Info,
        true,
        Some("query"),
        Some(query_id),
        details,
        None,
        None,
    )
}

/// Convenience wrapper: audit a configuration change (ambient, SPEC_FULL §3).
pub fn log_config_change(
    writer: &mut AuditWriter,
    user: &str,
    user_role: &str,
    config_key: &str,
    old_value_hash: &str,
    new_value_hash: &str,
) -> Result<AuditEvent> {
    writer.append(
        AuditAction::ConfigUpdate,
        user,
        Some(user_role),
        AuditSeverity::Warning,
        true,
        Some("config"),
        Some(config_key),
        serde_json::json!({
            "old_value_hash": old_value_hash,
            "new_value_hash": new_value_hash,
        }),
        None,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        (dir, path)
    }

    #[test]
    fn appended_events_form_a_valid_chain() {
        let (_dir, path) = tmp_path();
        let mut writer = AuditWriter::new(&path).unwrap();
        writer
            .append(
                AuditAction::QuerySubmit,
                "alice",
                Some("analyst"),
                AuditSeverity::Info,
                true,
                Some("sql_query"),
                None,
                serde_json::json!({"n": 1}),
                Some("req-1"),
                None,
            )
            .unwrap();
        writer
            .append(
                AuditAction::QueryExecute,
                "alice",
                Some("analyst"),
                AuditSeverity::Info,
                true,
                Some("sql_query"),
                None,
                serde_json::json!({"n": 2}),
                Some("req-1"),
                None,
            )
            .unwrap();

        let result = verify_hash_chain(&path).unwrap();
        assert_eq!(result, VerifyResult::Valid { lines: 2 });
    }

    #[test]
    fn tampering_with_a_line_breaks_verification() {
        let (_dir, path) = tmp_path();
        let mut writer = AuditWriter::new(&path).unwrap();
        writer
            .append(
                AuditAction::QuerySubmit,
                "bob",
                None,
                AuditSeverity::Info,
                true,
                None,
                None,
                serde_json::json!({}),
                None,
                None,
            )
            .unwrap();
        writer
            .append(
                AuditAction::QueryExecute,
                "bob",
                None,
                AuditSeverity::Info,
                true,
                None,
                None,
                serde_json::json!({}),
                None,
                None,
            )
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = content.lines().collect();
        let mut first: Value = serde_json::from_str(lines[0]).unwrap();
        first["user"] = Value::String("mallory".to_string());
        let tampered = serde_json::to_string(&first).unwrap();
        lines[0] = &tampered;
        let rewritten = lines.join("\n") + "\n";

        let result = verify_hash_chain_str(&rewritten).unwrap();
        match result {
            VerifyResult::Broken { line, .. } => assert_eq!(line, 1),
            VerifyResult::Valid { .. } => panic!("tampered chain reported valid"),
        }
    }

    #[test]
    fn resume_continues_the_chain_across_restarts() {
        let (_dir, path) = tmp_path();
        let mut writer = AuditWriter::new(&path).unwrap();
        let first = writer
            .append(
                AuditAction::HealthCheck,
                "system",
                None,
                AuditSeverity::Info,
                true,
                None,
                None,
                serde_json::json!({}),
                None,
                None,
            )
            .unwrap();
        drop(writer);

        let mut resumed = AuditWriter::resume(&path, first.hash_self.clone(), 1).unwrap();
        resumed
            .append(
                AuditAction::HealthCheck,
                "system",
                None,
                AuditSeverity::Info,
                true,
                None,
                None,
                serde_json::json!({}),
                None,
                None,
            )
            .unwrap();

        let result = verify_hash_chain(&path).unwrap();
        assert_eq!(result, VerifyResult::Valid { lines: 2 });
    }

    #[test]
    fn fingerprint_is_stable_across_whitespace_and_case() {
        let a = fingerprint_query("SELECT   *  FROM t");
        let b = fingerprint_query("select * from t");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn scan_entries_filters_and_orders_newest_first() {
        let (_dir, path) = tmp_path();
        let mut writer = AuditWriter::new(&path).unwrap();
        for i in 0..3 {
            writer
                .append(
                    AuditAction::QueryExecute,
                    "alice",
                    None,
                    AuditSeverity::Info,
                    true,
                    None,
                    None,
                    serde_json::json!({"i": i}),
                    None,
                    None,
                )
                .unwrap();
        }
        writer
            .append(
                AuditAction::QueryExecute,
                "bob",
                None,
                AuditSeverity::Info,
                true,
                None,
                None,
                serde_json::json!({}),
                None,
                None,
            )
            .unwrap();

        let alice_events = scan_entries(&path, 10, |ev| ev.user == "alice").unwrap();
        assert_eq!(alice_events.len(), 3);
        assert_eq!(alice_events[0].details["i"], 2);
    }

    #[test]
    fn log_query_execution_truncates_long_sql_and_records_error() {
        let (_dir, path) = tmp_path();
        let mut writer = AuditWriter::new(&path).unwrap();
        let long_sql = format!("SELECT {}", "a".repeat(600));
        let ev = log_query_execution(
            &mut writer,
            "alice",
            "analyst",
            &long_sql,
            false,
            Some(120),
            None,
            Some("ORA-00001"),
            Some("req-9"),
            Some("sess-1"),
        )
        .unwrap();

        assert_eq!(ev.severity, AuditSeverity::Error);
        assert!(!ev.success);
        assert_eq!(ev.details["sql_query"].as_str().unwrap().len(), 500);
        assert_eq!(ev.details["error"], "ORA-00001");
    }
}
