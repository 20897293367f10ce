//! An in-process `RemoteKv` fake, shared by every crate's test suite that
//! needs a `ResilientKv<K>` backend without a real Redis.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use qsql_resilient_client::RemoteKv;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct InMemoryKv {
    map: Mutex<HashMap<String, String>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteKv for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, String> {
        Ok(self.map.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), String> {
        self.map.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), String> {
        self.map.lock().await.remove(key);
        Ok(())
    }
}
