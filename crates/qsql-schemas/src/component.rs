//! `ComponentState` and derived system degradation level, spec §3/§4.3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComponentStatus {
    Operational,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentState {
    pub name: String,
    pub status: ComponentStatus,
    pub fallback_active: bool,
    pub degradation_reason: Option<String>,
    pub last_change: DateTime<Utc>,
}

impl ComponentState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ComponentStatus::Operational,
            fallback_active: false,
            degradation_reason: None,
            last_change: Utc::now(),
        }
    }
}

/// System-wide degradation level, spec §4.3: derived, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DegradationLevel {
    Normal,
    Partial,
    Severe,
    Critical,
}

impl DegradationLevel {
    /// Monotonic recomputation of the max(component statuses) invariant
    /// (spec §3 `ComponentState` invariant).
    pub fn derive(components: &[ComponentState]) -> Self {
        let degraded = components
            .iter()
            .filter(|c| c.status == ComponentStatus::Degraded)
            .count();
        let unavailable = components
            .iter()
            .filter(|c| c.status == ComponentStatus::Unavailable)
            .count();

        if unavailable >= 2 {
            DegradationLevel::Critical
        } else if unavailable >= 1 || degraded >= 2 {
            DegradationLevel::Severe
        } else if degraded >= 1 {
            DegradationLevel::Partial
        } else {
            DegradationLevel::Normal
        }
    }
}
