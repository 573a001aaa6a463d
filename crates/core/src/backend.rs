//! Backend trait — the abstraction over the assistant service.
//!
//! The backend accepts a message batch and returns a reply plus an optional
//! structured payload. The session manager only talks to this trait, so
//! tests substitute scripted implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BackendError;
use crate::feature::FeatureId;
use crate::message::ChatMessage;
use crate::session::ChatSession;

/// Sentinel error string a backend uses to signal overload.
pub const SERVICE_BUSY_SENTINEL: &str = "SERVICE_BUSY";

/// Whether a backend error string signals overload rather than a failure.
pub fn is_busy_sentinel(error: &str) -> bool {
    let error = error.trim();
    error.eq_ignore_ascii_case(SERVICE_BUSY_SENTINEL)
        || error.to_ascii_lowercase().contains("overloaded")
}

/// Reply format hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyType {
    #[default]
    Text,
    Html,
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,

    pub reply_type: ReplyType,

    /// The active feature
    pub mode: FeatureId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,

    /// Feature-owned state, passed through verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_context: Option<Value>,
}

/// Response of `POST /chat`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_data: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_state: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits_used: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatResponse {
    /// A successful reply carrying only a message.
    pub fn reply(message: ChatMessage) -> Self {
        Self {
            message: Some(message),
            ..Self::default()
        }
    }

    /// An explicit error reply.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Response of `GET /chat/sessions/:id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionEnvelope {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<ChatSession>,
}

/// The assistant backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// A human-readable name (e.g. "http").
    fn name(&self) -> &str;

    /// Send one message batch.
    async fn send(&self, request: ChatRequest) -> std::result::Result<ChatResponse, BackendError>;

    /// Fetch a stored session by id.
    async fn fetch_session(&self, session_id: &str) -> std::result::Result<SessionEnvelope, BackendError>;
}
