//! qsql-errors — error normalizer (spec C5 / §4.5 / §7).
//!
//! Pure functions mapping a backend-specific error payload to a
//! `NormalizedError`. Grounded on the category/retry partition in
//! `original_source/backend/app/core/resilience.py`'s error handling and the
//! invalid-identifier "available columns" hint from spec §4.5; re-expressed
//! as typed adapter-specific error payloads rather than regex-against-
//! `str(exception)` — spec §9 design note "classification-by-substring".

use std::collections::BTreeMap;

use qsql_schemas::{ErrorCategory, NormalizedError, SchemaSnapshot};
use regex::Regex;

/// A backend-specific error payload, produced by an adapter (Oracle/Doris/
/// Postgres) before normalization. Adapters never invent categories
/// themselves; they hand back a code + message and this crate maps it.
#[derive(Debug, Clone)]
pub struct BackendError {
    pub backend: Backend,
    /// Vendor error code when one is available (e.g. "ORA-00942").
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Oracle,
    Doris,
    Postgres,
}

/// Maps a `BackendError` to a `NormalizedError`, spec §4.5/§4.9's
/// `INVALID_IDENTIFIER` enrichment included when `schema` is supplied.
pub fn normalize(err: &BackendError, schema: Option<&SchemaSnapshot>) -> NormalizedError {
    let category = categorize(err);
    let code = err.code.clone().unwrap_or_else(|| "UNKNOWN".to_string());
    let mut normalized = NormalizedError::new(category, code, err.message.clone());

    if category == ErrorCategory::InvalidIdentifier {
        if let Some(schema) = schema {
            if let Some(table) = extract_table_hint(&err.message) {
                if let Some(columns) = schema.tables.get(&table) {
                    let names: Vec<serde_json::Value> = columns
                        .iter()
                        .map(|c| serde_json::Value::String(c.name.clone()))
                        .collect();
                    normalized = normalized
                        .with_metadata("available_columns", serde_json::Value::Array(names));
                }
            }
        }
    }

    normalized
}

fn categorize(err: &BackendError) -> ErrorCategory {
    match err.backend {
        Backend::Oracle => categorize_oracle(err),
        Backend::Doris => categorize_doris(err),
        Backend::Postgres => categorize_postgres(err),
    }
}

/// Oracle ORA-xxxxx codes mapped to the closed category set. Grounded on the
/// well-known Oracle error-code ranges (auth, syntax, resource) rather than
/// substring-matching the message text.
fn categorize_oracle(err: &BackendError) -> ErrorCategory {
    if let Some(code) = &err.code {
        let code = code.to_uppercase();
        return match code.as_str() {
            "ORA-00942" => ErrorCategory::InvalidTable,
            "ORA-00904" => ErrorCategory::InvalidIdentifier,
            "ORA-00933" | "ORA-00936" | "ORA-00923" => ErrorCategory::Syntax,
            "ORA-01722" | "ORA-01858" => ErrorCategory::DataTypeMismatch,
            "ORA-02291" | "ORA-02292" | "ORA-00001" => ErrorCategory::ConstraintViolation,
            "ORA-01031" => ErrorCategory::Permission,
            "ORA-01017" => ErrorCategory::Permission,
            "ORA-12541" | "ORA-12154" | "ORA-03113" | "ORA-03114" => ErrorCategory::ConnectionError,
            "ORA-12170" | "ORA-12535" => ErrorCategory::Timeout,
            "ORA-00018" | "ORA-00020" | "ORA-04031" => ErrorCategory::ResourceExhausted,
            _ => categorize_by_message(&err.message),
        };
    }
    categorize_by_message(&err.message)
}

fn categorize_doris(err: &BackendError) -> ErrorCategory {
    categorize_by_message(&err.message)
}

fn categorize_postgres(err: &BackendError) -> ErrorCategory {
    if let Some(code) = &err.code {
        // PostgreSQL SQLSTATE class prefixes.
        return match &code[..2.min(code.len())] {
            "42" => {
                if code == "42P01" {
                    ErrorCategory::InvalidTable
                } else if code == "42703" {
                    ErrorCategory::InvalidIdentifier
                } else {
                    ErrorCategory::Syntax
                }
            }
            "22" => ErrorCategory::DataTypeMismatch,
            "23" => ErrorCategory::ConstraintViolation,
            "28" => ErrorCategory::Permission,
            "08" => ErrorCategory::ConnectionError,
            "57" if code == "57014" => ErrorCategory::Timeout,
            "53" => ErrorCategory::ResourceExhausted,
            _ => categorize_by_message(&err.message),
        };
    }
    categorize_by_message(&err.message)
}

/// Last-resort categorization when no vendor code is present (e.g. network
/// layer errors raised before a backend ever assigns one).
fn categorize_by_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        ErrorCategory::Timeout
    } else if lower.contains("connection") || lower.contains("connect") {
        ErrorCategory::ConnectionError
    } else if lower.contains("network") {
        ErrorCategory::NetworkError
    } else if lower.contains("permission") || lower.contains("denied") || lower.contains("privilege") {
        ErrorCategory::Permission
    } else if lower.contains("quota") {
        ErrorCategory::QuotaExceeded
    } else if lower.contains("resource") || lower.contains("overload") || lower.contains("too many connections") {
        ErrorCategory::ResourceExhausted
    } else if lower.contains("syntax") {
        ErrorCategory::Syntax
    } else {
        ErrorCategory::Unknown
    }
}

fn extract_table_hint(message: &str) -> Option<String> {
    // Grounded on Oracle's `ORA-00904: "COL": invalid identifier` and
    // Postgres's `column "col" of relation "table" does not exist` shapes;
    // both name the offending identifier in quotes.
    let re = Regex::new(r#"(?i)relation\s+"([A-Za-z0-9_]+)""#).ok()?;
    re.captures(message)
        .map(|c| c[1].to_uppercase())
}

/// Per-category retry/metadata documentation helper used by `qsql-orchestrator`
/// to decide whether a node-level retry is worthwhile without re-deriving the
/// category from scratch. Returns an empty map for categories with no
/// additional structured context.
pub fn empty_metadata() -> BTreeMap<String, serde_json::Value> {
    BTreeMap::new()
}
