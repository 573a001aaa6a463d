//! The chat session record.
//!
//! A session belongs to exactly one (user, subject, feature) triple for its
//! whole lifetime. It is created lazily by the first successful send, or
//! hydrated by id from the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::feature::FeatureId;
use crate::message::ChatMessage;

/// Lifecycle status reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Archived,
}

/// A tracked conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// The person the conversation is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,

    /// Feature that was active when the session was created
    pub mode: FeatureId,

    /// Message log
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// Opaque state blob owned by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_state: Option<Value>,

    #[serde(default)]
    pub credits_used: f64,

    #[serde(default)]
    pub status: SessionStatus,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    /// Assemble a fresh session record.
    pub fn new(
        id: impl Into<String>,
        user_id: Option<String>,
        subject_id: Option<String>,
        mode: FeatureId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id,
            subject_id,
            mode,
            messages: Vec::new(),
            chat_state: None,
            credits_used: 0.0,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append messages to the session log.
    pub fn extend_log(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.messages.extend(messages);
        self.updated_at = Utc::now();
    }
}
