//! `QueryStateEvent`, the payload published over the SSE channel, spec §3/§6.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::lifecycle::QueryLifecycleState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStateEvent {
    pub query_id: Uuid,
    pub state: QueryLifecycleState,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_steps: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discoveries: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_queries: Option<Vec<String>>,
}

impl QueryStateEvent {
    pub fn new(query_id: Uuid, state: QueryLifecycleState) -> Self {
        Self {
            query_id,
            state,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
            thinking_steps: None,
            discoveries: None,
            sql: None,
            result: None,
            insights: None,
            suggested_queries: None,
        }
    }
}
