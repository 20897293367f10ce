//! Session binding, spec §4.8, grounded on
//! `original_source/backend/app/services/session_binding_service.py`.
//!
//! Prevents token-forwarding: an approval must come from the same
//! session/IP/user-agent tuple that initiated the query, modulo a
//! configurable IP tolerance.

use hmac::{Hmac, Mac};
use qsql_schemas::ApprovalBinding;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpTolerance {
    Strict,
    /// Compares only the first three IPv4 octets; falls back to exact match
    /// for non-IPv4 addresses.
    Subnet,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEventKind {
    UserMismatch,
    SessionMismatch,
    IpMismatch,
    UserAgentMismatch,
    FingerprintMismatch,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::UserMismatch => "user_mismatch",
            SecurityEventKind::SessionMismatch => "session_mismatch",
            SecurityEventKind::IpMismatch => "ip_mismatch",
            SecurityEventKind::UserAgentMismatch => "user_agent_mismatch",
            SecurityEventKind::FingerprintMismatch => "fingerprint_mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingMismatch {
    pub kind: SecurityEventKind,
    pub reason: String,
}

impl std::fmt::Display for BindingMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.reason)
    }
}

impl std::error::Error for BindingMismatch {}

/// `HMAC-SHA256(secret, session_id:ip_address:user_agent)`, hex-encoded and
/// truncated to 32 chars, matching the original's fingerprint length.
pub fn generate_fingerprint(secret: &str, session_id: &str, ip_address: &str, user_agent: &str) -> String {
    let data = format!("{session_id}:{ip_address}:{user_agent}");
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(data.as_bytes());
    let digest = mac.finalize().into_bytes();
    hex::encode(digest)[..32].to_string()
}

pub fn make_binding(secret: &str, session_id: &str, user_id: &str, ip_address: &str, user_agent: &str) -> ApprovalBinding {
    let fingerprint = generate_fingerprint(secret, session_id, ip_address, user_agent);
    ApprovalBinding {
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        ip_address: ip_address.to_string(),
        user_agent: user_agent.to_string(),
        fingerprint,
    }
}

/// Validate `now`'s session context against `original`, the binding
/// recorded at query initiation. Returns the specific mismatch on failure
/// so callers can log a security event and reject.
pub fn validate_approval(
    secret: &str,
    original: &ApprovalBinding,
    now: &ApprovalBinding,
    ip_tolerance: IpTolerance,
) -> Result<(), BindingMismatch> {
    if original.user_id != now.user_id {
        return Err(BindingMismatch {
            kind: SecurityEventKind::UserMismatch,
            reason: "approval must come from the query initiator".to_string(),
        });
    }

    if original.session_id != now.session_id {
        return Err(BindingMismatch {
            kind: SecurityEventKind::SessionMismatch,
            reason: "possible token forwarding attempt".to_string(),
        });
    }

    if !compare_ip(&original.ip_address, &now.ip_address, ip_tolerance) {
        return Err(BindingMismatch {
            kind: SecurityEventKind::IpMismatch,
            reason: "possible token forwarding attempt".to_string(),
        });
    }

    if !compare_user_agent(&original.user_agent, &now.user_agent) {
        return Err(BindingMismatch {
            kind: SecurityEventKind::UserAgentMismatch,
            reason: "possible token forwarding attempt".to_string(),
        });
    }

    let expected_fingerprint = generate_fingerprint(
        secret,
        &now.session_id,
        &now.ip_address,
        &now.user_agent,
    );
    if !constant_time_eq(original.fingerprint.as_bytes(), expected_fingerprint.as_bytes()) {
        return Err(BindingMismatch {
            kind: SecurityEventKind::FingerprintMismatch,
            reason: "possible tampering".to_string(),
        });
    }

    Ok(())
}

fn normalize_ip(ip: &str) -> &str {
    ip.strip_prefix("::ffff:").unwrap_or(ip).trim()
}

fn compare_ip(a: &str, b: &str, tolerance: IpTolerance) -> bool {
    let a = normalize_ip(a);
    let b = normalize_ip(b);
    match tolerance {
        IpTolerance::Strict => a == b,
        IpTolerance::Subnet => {
            let prefix = |ip: &str| ip.rsplit_once('.').map(|(p, _)| p.to_string());
            match (prefix(a), prefix(b)) {
                (Some(pa), Some(pb)) => pa == pb,
                _ => a == b,
            }
        }
        IpTolerance::None => true,
    }
}

const BROWSER_FAMILIES: &[&str] = &["chrome", "firefox", "safari", "edge", "opera"];
const MOBILE_KEYWORDS: &[&str] = &["mobile", "android", "iphone", "ipad"];

/// Allows browser-version drift within the same family/form-factor; rejects
/// a desktop<->mobile swap or a completely different browser with
/// dissimilar length, matching the original's similarity heuristic.
fn compare_user_agent(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a == b {
        return true;
    }

    let family = |ua: &str| BROWSER_FAMILIES.iter().find(|f| ua.contains(*f)).copied();
    if let (Some(fa), Some(fb)) = (family(&a), family(&b)) {
        if fa == fb {
            return true;
        }
    }

    let is_mobile = |ua: &str| MOBILE_KEYWORDS.iter().any(|k| ua.contains(k));
    if is_mobile(&a) != is_mobile(&b) {
        return false;
    }

    if !a.is_empty() && !b.is_empty() {
        let len_diff = (a.len() as f64 - b.len() as f64).abs() / a.len().max(b.len()) as f64;
        if len_diff < 0.2 {
            return true;
        }
    }

    false
}

/// Byte-xor constant-time comparison. Hand-rolled rather than pulling in
/// `subtle`: the teacher workspace doesn't carry it and this is the only
/// place in the repo that needs one constant-time compare.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
