//! Canonical error taxonomy, spec §3/§4.5/§7.
//!
//! A closed category set, hand-rolled enum + `Display`, the same shape as
//! `mqk-execution::gateway::GateRefusal` rather than reaching for `thiserror`
//! — the teacher never pulls that dependency in for its own error enums.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    ConnectionError,
    NetworkError,
    Timeout,
    Permission,
    Syntax,
    InvalidIdentifier,
    InvalidTable,
    DataTypeMismatch,
    ConstraintViolation,
    ResourceExhausted,
    QuotaExceeded,
    Unknown,
}

impl ErrorCategory {
    /// spec §4.5 / §7 retry partition: transient categories are retryable,
    /// permanent categories never are. `Unknown` defaults to non-retryable
    /// (fail closed).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCategory::ConnectionError
                | ErrorCategory::NetworkError
                | ErrorCategory::Timeout
                | ErrorCategory::ResourceExhausted
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStrategy {
    pub should_retry: bool,
    pub is_transient: bool,
}

impl RetryStrategy {
    pub fn for_category(category: ErrorCategory) -> Self {
        let transient = category.is_transient();
        Self {
            should_retry: transient,
            is_transient: transient,
        }
    }
}

/// Result of mapping a backend-specific error payload through C5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedError {
    pub category: ErrorCategory,
    pub error_code: String,
    pub message: String,
    pub user_message: String,
    pub retry_strategy: RetryStrategy,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl NormalizedError {
    pub fn new(category: ErrorCategory, error_code: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let user_message = Self::default_user_message(category, &message);
        Self {
            category,
            error_code: error_code.into(),
            message,
            user_message,
            retry_strategy: RetryStrategy::for_category(category),
            metadata: BTreeMap::new(),
        }
    }

    fn default_user_message(category: ErrorCategory, message: &str) -> String {
        use ErrorCategory::*;
        match category {
            ConnectionError | NetworkError => "A connection issue occurred; please retry shortly.".to_string(),
            Timeout => "The request timed out; please retry.".to_string(),
            Permission => "You do not have permission to run this query.".to_string(),
            Syntax => "The generated SQL was invalid and could not be executed.".to_string(),
            InvalidIdentifier => "One or more columns referenced do not exist.".to_string(),
            InvalidTable => "One or more tables referenced do not exist.".to_string(),
            DataTypeMismatch => "A data type mismatch occurred in the query.".to_string(),
            ConstraintViolation => "The query violated a database constraint.".to_string(),
            ResourceExhausted => "The database is temporarily overloaded; please retry.".to_string(),
            QuotaExceeded => "Your usage quota has been exceeded.".to_string(),
            Unknown => {
                if message.is_empty() {
                    "An unexpected error occurred.".to_string()
                } else {
                    "An unexpected error occurred.".to_string()
                }
            }
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_categories_are_retryable() {
        for c in [
            ErrorCategory::ConnectionError,
            ErrorCategory::NetworkError,
            ErrorCategory::Timeout,
            ErrorCategory::ResourceExhausted,
        ] {
            assert!(RetryStrategy::for_category(c).should_retry, "{c:?}");
        }
    }

    #[test]
    fn permanent_categories_are_not_retryable() {
        for c in [
            ErrorCategory::Syntax,
            ErrorCategory::InvalidIdentifier,
            ErrorCategory::InvalidTable,
            ErrorCategory::DataTypeMismatch,
            ErrorCategory::Permission,
            ErrorCategory::ConstraintViolation,
            ErrorCategory::QuotaExceeded,
        ] {
            assert!(!RetryStrategy::for_category(c).should_retry, "{c:?}");
        }
    }

    #[test]
    fn deterministic_for_identical_input() {
        let a = NormalizedError::new(ErrorCategory::Timeout, "ORA-TIMEOUT", "timeout");
        let b = NormalizedError::new(ErrorCategory::Timeout, "ORA-TIMEOUT", "timeout");
        assert_eq!(a.category, b.category);
        assert_eq!(a.error_code, b.error_code);
        assert_eq!(a.user_message, b.user_message);
    }
}
