//! Chat message domain types.
//!
//! These are the value objects that flow through the chat pipeline:
//! the user types → the session manager appends a user message → the backend
//! replies with an assistant message, possibly carrying structured payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The assistant backend
    Assistant,
    /// Locally synthesized notices (errors, busy signals)
    System,
}

/// Message content: plain text, or rendered markup plus feature payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Structured(StructuredContent),
}

/// Structured assistant content.
///
/// Any key other than `html`/`text` is a feature-specific sub-payload, e.g.
/// `boardGeneration` or `interpretation`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(flatten)]
    pub payloads: Map<String, Value>,
}

impl MessageContent {
    /// Best-effort plain text for display and logging.
    pub fn as_text(&self) -> &str {
        match self {
            MessageContent::Text(s) => s,
            MessageContent::Structured(c) => c
                .text
                .as_deref()
                .or(c.html.as_deref())
                .unwrap_or_default(),
        }
    }

    /// A named structured sub-payload. `None` for plain text content.
    pub fn payload(&self, key: &str) -> Option<&Value> {
        match self {
            MessageContent::Text(_) => None,
            MessageContent::Structured(c) => c.payloads.get(key),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, MessageContent::Structured(_))
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

/// A single message in a chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique message ID
    #[serde(default = "new_message_id")]
    pub id: String,

    /// Who sent this message
    pub role: Role,

    pub content: MessageContent,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Request context attached when the message was sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,

    /// Set on locally synthesized failure notices
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

impl ChatMessage {
    fn new(role: Role, content: MessageContent) -> Self {
        Self {
            id: new_message_id(),
            role,
            content,
            timestamp: Utc::now(),
            metadata: None,
            error: false,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(content.into()))
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(content.into()))
    }

    /// A system message flagged as a failure notice.
    pub fn system_error(content: impl Into<String>) -> Self {
        let mut msg = Self::system(content);
        msg.error = true;
        msg
    }

    /// Attach request metadata. Empty maps are dropped.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = (!metadata.is_empty()).then_some(metadata);
        self
    }

    pub fn text(&self) -> &str {
        self.content.as_text()
    }
}
