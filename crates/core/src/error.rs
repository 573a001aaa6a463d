//! Error types for the copanel domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

// --- Bounded context errors ---

/// Failures surfaced by the chat session manager.
///
/// These are never returned to callers of the manager; they are recorded in
/// its `error` slot and rendered as a system message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Message is empty")]
    Validation,

    #[error("The assistant is busy right now, please try again shortly")]
    ServiceBusy,

    #[error("{0}")]
    Remote(String),

    #[error("{0}")]
    Transport(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl ChatError {
    /// Text for the synthetic system message appended on failure.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

/// Errors produced by a [`crate::backend::ChatBackend`] implementation.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request failed: {message} (status: {status_code})")]
    Http { status_code: u16, message: String },

    #[error("Backend is overloaded")]
    Busy,

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl From<BackendError> for ChatError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Busy => ChatError::ServiceBusy,
            BackendError::Http { message, .. } if !message.trim().is_empty() => {
                ChatError::Transport(message)
            }
            other => ChatError::Transport(other.to_string()),
        }
    }
}

/// Errors from a [`crate::store::SessionStore`]. Always swallowed by callers.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to read session store: {0}")]
    Read(String),

    #[error("Failed to write session store: {0}")]
    Write(String),

    #[error("Failed to serialize session store: {0}")]
    Serialize(String),
}
