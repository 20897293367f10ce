//! `PendingApproval` and session binding records, spec §3/§4.8.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::role::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// The session-binding tuple captured at query initiation and re-validated
/// at approval time, spec §4.8 "Session binding" / GLOSSARY.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalBinding {
    pub session_id: String,
    pub user_id: String,
    pub ip_address: String,
    pub user_agent: String,
    /// HMAC(secret, session_id || ip_address || user_agent), hex-encoded.
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub query_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub original_sql: String,
    pub modified_sql: Option<String>,
    pub risk_assessment: Option<RiskLevel>,
    pub approval_status: ApprovalStatus,
    pub idempotency_key: String,
    pub binding: ApprovalBinding,
    pub requires_reapproval: bool,
}

impl PendingApproval {
    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at > ttl
    }
}
