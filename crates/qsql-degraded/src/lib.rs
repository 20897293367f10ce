//! qsql-degraded — process-wide degraded-mode registry (spec C3 / §4.3).

use std::collections::HashMap;

use chrono::Utc;
use qsql_schemas::{ComponentState, ComponentStatus, DegradationLevel};
use tokio::sync::RwLock;
use tracing::warn;

/// Static feature -> components map, answering `feature_available`.
#[derive(Debug, Clone)]
pub struct FeatureMap {
    entries: Vec<(&'static str, Vec<&'static str>)>,
}

impl Default for FeatureMap {
    fn default() -> Self {
        Self {
            entries: vec![
                ("natural_language_query", vec!["llm"]),
                ("schema_retrieval", vec!["redis", "oracle", "doris", "postgres"]),
                ("sql_execution", vec!["oracle", "doris", "postgres"]),
                ("approval_workflow", vec!["redis"]),
                ("result_caching", vec!["redis"]),
            ],
        }
    }
}

impl FeatureMap {
    pub fn components_for(&self, feature: &str) -> &[&'static str] {
        self.entries
            .iter()
            .find(|(f, _)| *f == feature)
            .map(|(_, c)| c.as_slice())
            .unwrap_or(&[])
    }
}

pub struct DegradedModeRegistry {
    components: RwLock<HashMap<String, ComponentState>>,
    feature_map: FeatureMap,
}

impl Default for DegradedModeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DegradedModeRegistry {
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
            feature_map: FeatureMap::default(),
        }
    }

    pub async fn register(&self, name: &str) {
        let mut guard = self.components.write().await;
        guard
            .entry(name.to_string())
            .or_insert_with(|| ComponentState::new(name));
    }

    pub async fn update(
        &self,
        name: &str,
        status: ComponentStatus,
        reason: Option<String>,
        fallback_active: Option<bool>,
    ) {
        let mut guard = self.components.write().await;
        let entry = guard
            .entry(name.to_string())
            .or_insert_with(|| ComponentState::new(name));
        if entry.status != status {
            warn!(component = name, ?status, "component status change");
        }
        entry.status = status;
        entry.degradation_reason = reason;
        if let Some(f) = fallback_active {
            entry.fallback_active = f;
        }
        entry.last_change = Utc::now();
    }

    pub async fn system_status(&self) -> DegradationLevel {
        let guard = self.components.read().await;
        let components: Vec<ComponentState> = guard.values().cloned().collect();
        DegradationLevel::derive(&components)
    }

    pub async fn component_status(&self, name: &str) -> Option<ComponentState> {
        self.components.read().await.get(name).cloned()
    }

    pub async fn all(&self) -> Vec<ComponentState> {
        self.components.read().await.values().cloned().collect()
    }

    /// True iff every component backing `feature` is OPERATIONAL.
    pub async fn feature_available(&self, feature: &str) -> bool {
        let needed = self.feature_map.components_for(feature);
        if needed.is_empty() {
            return true;
        }
        let guard = self.components.read().await;
        needed.iter().all(|name| {
            guard
                .get(*name)
                .map(|c| c.status == ComponentStatus::Operational)
                .unwrap_or(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_registry_is_normal() {
        let reg = DegradedModeRegistry::new();
        reg.register("redis").await;
        assert_eq!(reg.system_status().await, DegradationLevel::Normal);
    }

    #[tokio::test]
    async fn degrading_one_component_is_visible() {
        let reg = DegradedModeRegistry::new();
        reg.register("redis").await;
        reg.update(
            "redis",
            ComponentStatus::Degraded,
            Some("latency spike".into()),
            Some(true),
        )
        .await;
        assert_eq!(reg.system_status().await, DegradationLevel::Partial);
        let c = reg.component_status("redis").await.unwrap();
        assert!(c.fallback_active);
        assert_eq!(c.degradation_reason.as_deref(), Some("latency spike"));
    }

    #[tokio::test]
    async fn feature_unavailable_when_backing_component_down() {
        let reg = DegradedModeRegistry::new();
        reg.register("llm").await;
        reg.update("llm", ComponentStatus::Unavailable, None, None).await;
        assert!(!reg.feature_available("natural_language_query").await);
    }

    #[tokio::test]
    async fn unknown_feature_defaults_available() {
        let reg = DegradedModeRegistry::new();
        assert!(reg.feature_available("nonexistent_feature").await);
    }

    #[tokio::test]
    async fn two_unavailable_components_is_critical() {
        let reg = DegradedModeRegistry::new();
        reg.register("oracle").await;
        reg.register("doris").await;
        reg.update("oracle", ComponentStatus::Unavailable, None, None).await;
        reg.update("doris", ComponentStatus::Unavailable, None, None).await;
        assert_eq!(reg.system_status().await, DegradationLevel::Critical);
    }
}
