//! Shell event system — explicit subscribe/notify between components.
//!
//! Components publish when something observable changes (a feature became
//! active, a panel resized, a shared-state slot was written). Views and
//! feature code subscribe instead of reaching into each other's state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::feature::FeatureId;

/// All events in the shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShellEvent {
    /// A navigation was requested (path write)
    NavigationRequested {
        path: String,
        timestamp: DateTime<Utc>,
    },

    /// A transition completed and a feature became active
    FeatureActivated {
        feature: FeatureId,
        timestamp: DateTime<Utc>,
    },

    /// A panel opened, closed or resized
    PanelChanged {
        feature: FeatureId,
        is_open: bool,
        size: f32,
        timestamp: DateTime<Utc>,
    },

    /// The session manager replaced its session record
    SessionReplaced {
        session_id: String,
        feature: FeatureId,
        timestamp: DateTime<Utc>,
    },

    /// Session and history were reset
    SessionCleared { timestamp: DateTime<Utc> },

    /// A shared-state slot was written
    SharedStateUpdated {
        key: String,
        timestamp: DateTime<Utc>,
    },

    /// Cache namespaces the data-fetching layer should invalidate
    CacheInvalidated {
        keys: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A failure was recorded
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for shell events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<ShellEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: ShellEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ShellEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
