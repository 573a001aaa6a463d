//! Session store trait — cross-reload persistence of the current session id.
//!
//! Only the session *id* is persisted, keyed per (user, subject, feature).
//! Implementations: in-memory (for testing) and a JSON file.

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::feature::FeatureId;

/// Build the storage key for a (user, subject, feature) triple.
///
/// Format: `chat.session.<userId|anonymous>.<subjectId|none>.<featureId>`.
pub fn storage_key(user_id: Option<&str>, subject_id: Option<&str>, feature: FeatureId) -> String {
    format!(
        "chat.session.{}.{}.{}",
        user_id.unwrap_or("anonymous"),
        subject_id.unwrap_or("none"),
        feature
    )
}

/// Key/value persistence for session ids.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The store name (e.g. "memory", "file").
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> std::result::Result<Option<String>, PersistenceError>;

    async fn set(&self, key: &str, session_id: &str) -> std::result::Result<(), PersistenceError>;

    /// Remove a key. Returns whether it existed.
    async fn remove(&self, key: &str) -> std::result::Result<bool, PersistenceError>;
}
