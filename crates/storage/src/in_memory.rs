//! In-memory store, for tests and sessions that should not outlive the process.

use async_trait::async_trait;
use copanel_core::error::PersistenceError;
use copanel_core::store::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct InMemorySessionStore {
    ids: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            ids: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.ids.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.read().await.is_empty()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.ids.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, session_id: &str) -> Result<(), PersistenceError> {
        self.ids
            .write()
            .await
            .insert(key.to_string(), session_id.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, PersistenceError> {
        Ok(self.ids.write().await.remove(key).is_some())
    }
}
