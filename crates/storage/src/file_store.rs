//! File-backed session-id store.
//!
//! The whole map lives in one JSON object (`{"<key>": "<session id>"}`).
//! It is read once on creation and rewritten on every mutation, so reads
//! never touch the disk.
//!
//! Default location: `~/.copanel/sessions.json`

use async_trait::async_trait;
use copanel_core::error::PersistenceError;
use copanel_core::store::SessionStore;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct FileSessionStore {
    path: PathBuf,
    ids: Arc<RwLock<BTreeMap<String, String>>>,
}

impl FileSessionStore {
    /// Open the store at `path`. A missing file starts empty; an unreadable
    /// or corrupt one is logged and also starts empty.
    pub fn new(path: PathBuf) -> Self {
        let ids = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = ids.len(), "Session store loaded");
        Self {
            path,
            ids: Arc::new(RwLock::new(ids)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> BTreeMap<String, String> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read session store");
                return BTreeMap::new();
            }
        };
        if content.trim().is_empty() {
            return BTreeMap::new();
        }

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring corrupt session store");
            BTreeMap::new()
        })
    }

    async fn flush(&self) -> Result<(), PersistenceError> {
        let content = {
            let ids = self.ids.read().await;
            serde_json::to_string_pretty(&*ids)
                .map_err(|e| PersistenceError::Serialize(e.to_string()))?
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PersistenceError::Write(format!("Failed to create store directory: {e}"))
            })?;
        }

        std::fs::write(&self.path, content)
            .map_err(|e| PersistenceError::Write(format!("Failed to write session store: {e}")))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.ids.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, session_id: &str) -> Result<(), PersistenceError> {
        let previous = self
            .ids
            .write()
            .await
            .insert(key.to_string(), session_id.to_string());
        if previous.as_deref() == Some(session_id) {
            return Ok(());
        }
        self.flush().await
    }

    async fn remove(&self, key: &str) -> Result<bool, PersistenceError> {
        let removed = self.ids.write().await.remove(key).is_some();
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }
}
