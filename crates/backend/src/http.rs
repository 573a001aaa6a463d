//! HTTP assistant backend.
//!
//! - `POST {base}/chat` sends a message batch
//! - `GET {base}/chat/sessions/:id` fetches a stored session
//!
//! Overload is reported as [`BackendError::Busy`] when the server answers
//! 503/529 or puts the busy sentinel in a non-2xx error body. A 2xx body with
//! an `error` field is returned as-is; the session manager decides what it
//! means.

use std::time::Duration;

use async_trait::async_trait;
use copanel_config::BackendConfig;
use copanel_core::backend::{ChatBackend, ChatRequest, ChatResponse, SessionEnvelope, is_busy_sentinel};
use copanel_core::error::BackendError;
use serde::Deserialize;
use tracing::{debug, warn};

/// Statuses that mean "try again later" rather than "this request failed".
const BUSY_STATUSES: [u16; 2] = [503, 529];

pub struct HttpChatBackend {
    base_url: String,
    client: reqwest::Client,
}

/// Shape of a non-2xx body, when the server sends JSON.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpChatBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Map a non-2xx response to an error, reading the body for detail.
    async fn error_for(response: reqwest::Response) -> BackendError {
        let status = response.status().as_u16();
        if BUSY_STATUSES.contains(&status) {
            return BackendError::Busy;
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.or(b.message))
            .unwrap_or(body);

        if is_busy_sentinel(&detail) {
            return BackendError::Busy;
        }

        warn!(status, body = %detail, "Backend returned error");
        BackendError::Http {
            status_code: status,
            message: detail,
        }
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: ChatRequest) -> Result<ChatResponse, BackendError> {
        let url = format!("{}/chat", self.base_url);

        debug!(
            mode = %request.mode,
            session_id = ?request.session_id,
            messages = request.messages.len(),
            "Sending chat request"
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        debug!(
            session_id = ?reply.session_id,
            has_message = reply.message.is_some(),
            has_context = reply.context_data.is_some(),
            "Chat response received"
        );
        Ok(reply)
    }

    async fn fetch_session(&self, session_id: &str) -> Result<SessionEnvelope, BackendError> {
        let url = format!("{}/chat/sessions/{}", self.base_url, session_id);
        debug!(session_id, "Fetching session");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(SessionEnvelope::default());
        }
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}
