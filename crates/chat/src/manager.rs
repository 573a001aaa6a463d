//! Chat session manager.
//!
//! Owns the conversation with the assistant backend: the visible history,
//! the tracked session record, the in-flight flag and the last error.
//!
//! Rules enforced here:
//! - One send at a time. A send issued while another is outstanding is
//!   rejected rather than queued.
//! - Every reset (clear, new session, successful load, subject change)
//!   bumps a generation counter. A response that comes back under an older
//!   generation is dropped.
//! - Failures never escape as `Err`. They land in [`ChatSessionManager::error`]
//!   and as a system message in the history.
//!
//! State sits behind a `tokio::sync::RwLock` that is released before every
//! backend or store call.

use std::sync::Arc;

use chrono::Utc;
use copanel_core::backend::is_busy_sentinel;
use copanel_core::{
    ChatBackend, ChatError, ChatMessage, ChatRequest, ChatResponse, ChatSession, EventBus,
    FeatureId, ReplyType, Role, SessionStore, ShellEvent, storage_key,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::registry::MetadataRegistry;
use crate::router::ContextResponseRouter;

const TRANSPORT_FALLBACK: &str = "Could not reach the assistant";
const EMPTY_REPLY: &str = "The assistant returned an empty reply";

/// Per-send options.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Merged over the active feature's builder output; these keys win.
    pub additional_metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Default)]
struct ManagerState {
    session: Option<ChatSession>,
    history: Vec<ChatMessage>,
    is_sending: bool,
    error: Option<ChatError>,
    generation: u64,
    user_id: Option<String>,
    subject_id: Option<String>,
    /// Set once a subject value (including none) has been observed.
    subject_seen: bool,
}

impl ManagerState {
    fn reset(&mut self) {
        self.session = None;
        self.history.clear();
        self.error = None;
        self.generation += 1;
    }

    fn storage_key(&self, feature: FeatureId) -> String {
        storage_key(self.user_id.as_deref(), self.subject_id.as_deref(), feature)
    }

    /// Record a failure and return the notice appended to the history.
    fn fail(&mut self, error: ChatError) -> ChatMessage {
        let notice = ChatMessage::system_error(error.user_message());
        self.history.push(notice.clone());
        self.error = Some(error);
        self.is_sending = false;
        notice
    }
}

pub struct ChatSessionManager {
    backend: Arc<dyn ChatBackend>,
    registry: Arc<MetadataRegistry>,
    router: ContextResponseRouter,
    store: Option<Arc<dyn SessionStore>>,
    reply_type: ReplyType,
    events: EventBus,
    state: RwLock<ManagerState>,
}

impl ChatSessionManager {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        registry: Arc<MetadataRegistry>,
        router: ContextResponseRouter,
        events: EventBus,
    ) -> Self {
        Self {
            backend,
            registry,
            router,
            store: None,
            reply_type: ReplyType::default(),
            events,
            state: RwLock::new(ManagerState::default()),
        }
    }

    /// Persist session ids in `store` across restarts.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_reply_type(mut self, reply_type: ReplyType) -> Self {
        self.reply_type = reply_type;
        self
    }

    /// Initial user and subject. Setting the subject here is its first
    /// observation, so it never clears anything.
    pub fn with_identity(mut self, user_id: Option<String>, subject_id: Option<String>) -> Self {
        {
            let state = self.state.get_mut();
            state.user_id = user_id;
            state.subject_id = subject_id;
            state.subject_seen = true;
        }
        self
    }

    pub fn persistence_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Send one user message.
    ///
    /// Returns the assistant reply, the system notice describing a failure,
    /// or `None` when nothing was sent (empty input, a send already in
    /// flight, or a response that arrived after a reset).
    pub async fn send_message(&self, content: &str, options: SendOptions) -> Option<ChatMessage> {
        let text = content.trim();
        if text.is_empty() {
            debug!(error = %ChatError::Validation, "Ignoring empty message");
            return None;
        }

        let feature = self.registry.active_feature();
        let mut metadata = self.registry.get_metadata().unwrap_or_default();
        if let Some(extra) = options.additional_metadata {
            metadata.extend(extra);
        }
        let mode_context = metadata.get("modeContext").cloned();
        let user_message = ChatMessage::user(text).with_metadata(metadata);

        let (generation, request) = {
            let mut state = self.state.write().await;
            if state.is_sending {
                info!(feature = %feature, "A message is already in flight; send rejected");
                return None;
            }
            state.history.push(user_message.clone());
            state.is_sending = true;
            state.subject_seen = true;
            state.error = None;

            let request = ChatRequest {
                messages: vec![user_message.clone()],
                reply_type: self.reply_type,
                mode: feature,
                session_id: state.session.as_ref().map(|s| s.id.clone()),
                user_id: state.user_id.clone(),
                subject_id: state.subject_id.clone(),
                mode_context,
            };
            (state.generation, request)
        };

        debug!(
            feature = %feature,
            session_id = ?request.session_id,
            backend = self.backend.name(),
            "Sending message"
        );
        let result = self.backend.send(request).await;

        let mut state = self.state.write().await;
        if state.generation != generation {
            info!(feature = %feature, "Session was reset while sending; response discarded");
            state.is_sending = false;
            return None;
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                let error = match ChatError::from(e) {
                    ChatError::Transport(text) if text.trim().is_empty() => {
                        ChatError::Transport(TRANSPORT_FALLBACK.into())
                    }
                    other => other,
                };
                warn!(feature = %feature, error = %error, "Chat request failed");
                let notice = state.fail(error.clone());
                drop(state);
                self.publish_error(&error);
                return Some(notice);
            }
        };

        let ChatResponse {
            message,
            context_data,
            session_id,
            chat_state,
            credits_used,
            error,
        } = response;

        let reply = match (error, message) {
            (Some(remote), _) => {
                let error = if is_busy_sentinel(&remote) {
                    ChatError::ServiceBusy
                } else {
                    ChatError::Remote(remote)
                };
                warn!(feature = %feature, error = %error, "Assistant reported an error");
                let notice = state.fail(error.clone());
                drop(state);
                self.publish_error(&error);
                return Some(notice);
            }
            (None, None) => {
                let error = ChatError::Remote(EMPTY_REPLY.into());
                let notice = state.fail(error.clone());
                drop(state);
                self.publish_error(&error);
                return Some(notice);
            }
            (None, Some(message)) => message,
        };

        state.history.push(reply.clone());
        state.is_sending = false;

        let exchange = [user_message, reply.clone()];
        let mut replaced = None;
        match session_id {
            Some(id) if state.session.as_ref().is_none_or(|s| s.id != id) => {
                let mut session =
                    ChatSession::new(id, state.user_id.clone(), state.subject_id.clone(), feature);
                session.extend_log(exchange);
                session.chat_state = chat_state;
                session.credits_used = credits_used.unwrap_or_default();
                replaced = Some((session.id.clone(), state.storage_key(feature)));
                state.session = Some(session);
            }
            _ => {
                if let Some(session) = state.session.as_mut() {
                    session.extend_log(exchange);
                    if chat_state.is_some() {
                        session.chat_state = chat_state;
                    }
                    if let Some(credits) = credits_used {
                        session.credits_used = credits;
                    }
                }
            }
        }
        let subject_id = state.subject_id.clone();
        drop(state);

        if let Some(context) = context_data {
            let outcome = self.router.route(&context, subject_id.as_deref());
            debug!(
                slots = outcome.slots_written.len(),
                invalidations = outcome.invalidations.len(),
                "Routed context data"
            );
        }

        if let Some((session_id, key)) = replaced {
            info!(session_id = %session_id, feature = %feature, "Session started");
            self.events.publish(ShellEvent::SessionReplaced {
                session_id: session_id.clone(),
                feature,
                timestamp: Utc::now(),
            });
            self.persist(&key, &session_id).await;
        }

        Some(reply)
    }

    /// Drop the current session and history. `mode` is informational only.
    pub async fn start_new_session(&self, mode: Option<FeatureId>) {
        debug!(mode = ?mode, "Starting new session");
        self.clear_session().await;
    }

    /// Drop the current session and history and forget the stored id.
    pub async fn clear_session(&self) {
        let key = {
            let mut state = self.state.write().await;
            state.reset();
            state.storage_key(self.registry.active_feature())
        };
        self.forget(&key).await;
        self.events.publish(ShellEvent::SessionCleared {
            timestamp: Utc::now(),
        });
    }

    /// Replace the current session with a stored one.
    ///
    /// On failure the error is recorded and everything else is left alone,
    /// including any send in flight. Success counts as a reset.
    pub async fn load_session(&self, session_id: &str) -> bool {
        let generation = self.state.read().await.generation;

        let result = self.backend.fetch_session(session_id).await;

        let mut state = self.state.write().await;
        if state.generation != generation {
            info!(session_id, "Session load superseded");
            return false;
        }

        let session = match result {
            Ok(envelope) => match envelope.session {
                Some(session) if envelope.success => session,
                _ => {
                    warn!(session_id, "Session not found");
                    state.error = Some(ChatError::SessionNotFound(session_id.to_string()));
                    return false;
                }
            },
            Err(e) => {
                warn!(session_id, error = %e, "Failed to load session");
                state.error = Some(e.into());
                return false;
            }
        };

        let feature = self.registry.active_feature();
        let key = state.storage_key(feature);
        state.generation += 1;
        state.history = session.messages.clone();
        state.error = None;
        let id = session.id.clone();
        state.session = Some(session);
        drop(state);

        info!(session_id = %id, feature = %feature, "Session loaded");
        self.events.publish(ShellEvent::SessionReplaced {
            session_id: id.clone(),
            feature,
            timestamp: Utc::now(),
        });
        self.persist(&key, &id).await;
        true
    }

    /// Reload the stored session for the current user, subject and feature.
    ///
    /// Does nothing unless persistence is on and no session is loaded yet.
    /// A stored id that no longer loads is removed.
    pub async fn restore(&self) -> bool {
        let Some(store) = self.store.clone() else {
            return false;
        };
        let key = {
            let state = self.state.read().await;
            if state.session.is_some() {
                return false;
            }
            state.storage_key(self.registry.active_feature())
        };

        let session_id = match store.get(&key).await {
            Ok(Some(id)) => id,
            Ok(None) => return false,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not read stored session id");
                return false;
            }
        };

        if self.load_session(&session_id).await {
            return true;
        }
        debug!(key = %key, session_id = %session_id, "Removing stale session id");
        self.forget(&key).await;
        false
    }

    /// Observe the active subject. Any change after the first observation,
    /// to or from no subject included, resets the conversation. Stored
    /// session ids are kept so the new subject can restore its own.
    ///
    /// A send counts as an observation of the subject it went out under.
    pub async fn set_subject(&self, subject_id: Option<String>) {
        let mut state = self.state.write().await;
        let changed = state.subject_seen && state.subject_id != subject_id;
        state.subject_id = subject_id;
        state.subject_seen = true;
        if changed {
            state.reset();
            drop(state);
            info!("Subject changed; session cleared");
            self.events.publish(ShellEvent::SessionCleared {
                timestamp: Utc::now(),
            });
        }
    }

    pub async fn set_user(&self, user_id: Option<String>) {
        self.state.write().await.user_id = user_id;
    }

    async fn persist(&self, key: &str, session_id: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.set(key, session_id).await {
                warn!(key, error = %e, "Failed to persist session id");
            }
        }
    }

    async fn forget(&self, key: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(key).await {
                warn!(key, error = %e, "Failed to remove stored session id");
            }
        }
    }

    fn publish_error(&self, error: &ChatError) {
        self.events.publish(ShellEvent::ErrorOccurred {
            context: "chat".into(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    // --- Accessors ---

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.state.read().await.history.clone()
    }

    pub async fn session(&self) -> Option<ChatSession> {
        self.state.read().await.session.clone()
    }

    pub async fn error(&self) -> Option<ChatError> {
        self.state.read().await.error.clone()
    }

    pub async fn is_sending(&self) -> bool {
        self.state.read().await.is_sending
    }

    pub async fn user_id(&self) -> Option<String> {
        self.state.read().await.user_id.clone()
    }

    pub async fn subject_id(&self) -> Option<String> {
        self.state.read().await.subject_id.clone()
    }

    /// Persistence key for the current user, subject and active feature.
    pub async fn storage_key(&self) -> String {
        self.state
            .read()
            .await
            .storage_key(self.registry.active_feature())
    }

    pub async fn last_assistant_message(&self) -> Option<ChatMessage> {
        self.last_with_role(Role::Assistant).await
    }

    pub async fn last_user_message(&self) -> Option<ChatMessage> {
        self.last_with_role(Role::User).await
    }

    async fn last_with_role(&self, role: Role) -> Option<ChatMessage> {
        self.state
            .read()
            .await
            .history
            .iter()
            .rev()
            .find(|m| m.role == role)
            .cloned()
    }

    /// A structured sub-payload of the latest assistant reply.
    pub async fn last_assistant_payload(&self, key: &str) -> Option<Value> {
        let message = self.last_assistant_message().await?;
        message.content.payload(key).cloned()
    }

    /// Like [`last_assistant_payload`](Self::last_assistant_payload), decoded
    /// into `T`. Payloads that do not fit `T` yield `None`.
    pub async fn last_assistant_payload_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.last_assistant_payload(key).await?;
        match serde_json::from_value(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "Payload did not match the requested type");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use copanel_core::error::{BackendError, PersistenceError};
    use copanel_core::shared_state::PROGRAM_DATA;
    use copanel_core::{SessionEnvelope, SharedState};
    use copanel_storage::InMemorySessionStore;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::{Notify, watch};

    // ── Mock backend ────────────────────────────────────────────────────

    /// Returns scripted results in order and records every request.
    struct ScriptedBackend {
        replies: Mutex<Vec<Result<ChatResponse, BackendError>>>,
        sessions: Mutex<HashMap<String, ChatSession>>,
        requests: Mutex<Vec<ChatRequest>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<ChatResponse, BackendError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                sessions: Mutex::new(HashMap::new()),
                requests: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        /// Every send waits for `gate` to be notified before replying.
        fn gated(replies: Vec<Result<ChatResponse, BackendError>>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(replies)
            }
        }

        fn with_session(self, session: ChatSession) -> Self {
            self.sessions
                .lock()
                .unwrap()
                .insert(session.id.clone(), session);
            self
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, request: ChatRequest) -> Result<ChatResponse, BackendError> {
            self.requests.lock().unwrap().push(request);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let mut replies = self.replies.lock().unwrap();
            assert!(!replies.is_empty(), "ScriptedBackend exhausted");
            replies.remove(0)
        }

        async fn fetch_session(&self, session_id: &str) -> Result<SessionEnvelope, BackendError> {
            let session = self.sessions.lock().unwrap().get(session_id).cloned();
            Ok(SessionEnvelope {
                success: session.is_some(),
                session,
            })
        }
    }

    /// A store whose every operation fails.
    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, PersistenceError> {
            Err(PersistenceError::Read("disk on fire".into()))
        }
        async fn set(&self, _key: &str, _id: &str) -> Result<(), PersistenceError> {
            Err(PersistenceError::Write("disk on fire".into()))
        }
        async fn remove(&self, _key: &str) -> Result<bool, PersistenceError> {
            Err(PersistenceError::Write("disk on fire".into()))
        }
    }

    fn reply(text: &str, session_id: &str) -> Result<ChatResponse, BackendError> {
        Ok(ChatResponse {
            session_id: Some(session_id.into()),
            credits_used: Some(1.0),
            ..ChatResponse::reply(ChatMessage::assistant(text))
        })
    }

    struct Harness {
        manager: Arc<ChatSessionManager>,
        backend: Arc<ScriptedBackend>,
        registry: Arc<MetadataRegistry>,
        shared: Arc<SharedState>,
        active: watch::Sender<FeatureId>,
    }

    fn harness(backend: ScriptedBackend) -> Harness {
        harness_with(backend, |m| m)
    }

    fn harness_with(
        backend: ScriptedBackend,
        configure: impl FnOnce(ChatSessionManager) -> ChatSessionManager,
    ) -> Harness {
        let events = EventBus::default();
        let (active, rx) = watch::channel(FeatureId::Chat);
        let registry = Arc::new(MetadataRegistry::new(rx));
        let shared = Arc::new(SharedState::new(events.clone()));
        let router = ContextResponseRouter::new(Arc::clone(&shared), events.clone());
        let backend = Arc::new(backend);
        let manager = ChatSessionManager::new(
            Arc::clone(&backend) as Arc<dyn ChatBackend>,
            Arc::clone(&registry),
            router,
            events,
        );
        Harness {
            manager: Arc::new(configure(manager)),
            backend,
            registry,
            shared,
            active,
        }
    }

    // ── Sending ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn blank_input_is_a_no_op() {
        let h = harness(ScriptedBackend::new(vec![]));
        assert!(h.manager.send_message("", SendOptions::default()).await.is_none());
        assert!(h.manager.send_message("   ", SendOptions::default()).await.is_none());
        assert!(h.manager.history().await.is_empty());
        assert!(h.backend.requests().is_empty());
        assert!(h.manager.error().await.is_none());
    }

    #[tokio::test]
    async fn successful_send_starts_session() {
        let h = harness(ScriptedBackend::new(vec![reply("Hi there", "s-1")]));

        let answer = h
            .manager
            .send_message("  hello  ", SendOptions::default())
            .await
            .unwrap();
        assert_eq!(answer.text(), "Hi there");

        let history = h.manager.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].text(), "hello");
        assert_eq!(history[1].role, Role::Assistant);

        let session = h.manager.session().await.unwrap();
        assert_eq!(session.id, "s-1");
        assert_eq!(session.mode, FeatureId::Chat);
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.credits_used, 1.0);
        assert!(!h.manager.is_sending().await);

        let request = &h.backend.requests()[0];
        assert_eq!(request.mode, FeatureId::Chat);
        assert!(request.session_id.is_none());
        assert_eq!(request.messages.len(), 1);
    }

    #[tokio::test]
    async fn same_session_id_appends_exchange() {
        let h = harness(ScriptedBackend::new(vec![
            reply("one", "s-1"),
            Ok(ChatResponse {
                session_id: Some("s-1".into()),
                chat_state: Some(json!({"step": 2})),
                credits_used: Some(3.0),
                ..ChatResponse::reply(ChatMessage::assistant("two"))
            }),
        ]));
        h.manager.send_message("first", SendOptions::default()).await;
        h.manager.send_message("second", SendOptions::default()).await;

        assert_eq!(h.backend.requests()[1].session_id.as_deref(), Some("s-1"));
        let session = h.manager.session().await.unwrap();
        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.chat_state, Some(json!({"step": 2})));
        assert_eq!(session.credits_used, 3.0);
    }

    #[tokio::test]
    async fn new_session_id_replaces_record() {
        let h = harness(ScriptedBackend::new(vec![reply("one", "s-1"), reply("two", "s-2")]));
        h.manager.send_message("first", SendOptions::default()).await;
        h.manager.send_message("second", SendOptions::default()).await;

        let session = h.manager.session().await.unwrap();
        assert_eq!(session.id, "s-2");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].text(), "second");
        // The visible history keeps everything
        assert_eq!(h.manager.history().await.len(), 4);
    }

    #[tokio::test]
    async fn user_message_is_visible_before_reply() {
        let gate = Arc::new(Notify::new());
        let h = harness(ScriptedBackend::gated(vec![reply("ok", "s-1")], Arc::clone(&gate)));

        let manager = Arc::clone(&h.manager);
        let pending = tokio::spawn(async move {
            manager.send_message("hello", SendOptions::default()).await
        });
        while h.backend.requests().is_empty() {
            tokio::task::yield_now().await;
        }

        let history = h.manager.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
        assert!(h.manager.is_sending().await);

        gate.notify_one();
        assert!(pending.await.unwrap().is_some());
        assert_eq!(h.manager.history().await.len(), 2);
    }

    #[tokio::test]
    async fn second_send_while_in_flight_is_rejected() {
        let gate = Arc::new(Notify::new());
        let h = harness(ScriptedBackend::gated(vec![reply("ok", "s-1")], Arc::clone(&gate)));

        let manager = Arc::clone(&h.manager);
        let pending = tokio::spawn(async move {
            manager.send_message("first", SendOptions::default()).await
        });
        while h.backend.requests().is_empty() {
            tokio::task::yield_now().await;
        }

        assert!(h.manager.send_message("second", SendOptions::default()).await.is_none());
        assert_eq!(h.manager.history().await.len(), 1);

        gate.notify_one();
        pending.await.unwrap();
        assert_eq!(h.backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn response_after_clear_is_discarded() {
        let gate = Arc::new(Notify::new());
        let h = harness(ScriptedBackend::gated(vec![reply("late", "s-9")], Arc::clone(&gate)));

        let manager = Arc::clone(&h.manager);
        let pending = tokio::spawn(async move {
            manager.send_message("hello", SendOptions::default()).await
        });
        while h.backend.requests().is_empty() {
            tokio::task::yield_now().await;
        }

        h.manager.clear_session().await;
        gate.notify_one();

        assert!(pending.await.unwrap().is_none());
        assert!(h.manager.history().await.is_empty());
        assert!(h.manager.session().await.is_none());
        assert!(!h.manager.is_sending().await);
    }

    // ── Metadata ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn mode_context_follows_active_feature() {
        let h = harness(ScriptedBackend::new(vec![reply("a", "s-1"), reply("b", "s-1")]));
        h.registry.register(FeatureId::Boards, || {
            let mut m = Map::new();
            m.insert("modeContext".into(), json!({"board": {"id": "b1"}}));
            m
        });

        h.active.send_replace(FeatureId::Boards);
        h.manager.send_message("make a board", SendOptions::default()).await;
        h.active.send_replace(FeatureId::Chat);
        h.manager.send_message("just chatting", SendOptions::default()).await;

        let requests = h.backend.requests();
        assert_eq!(requests[0].mode, FeatureId::Boards);
        assert_eq!(requests[0].mode_context, Some(json!({"board": {"id": "b1"}})));
        let body = serde_json::to_value(&requests[0]).unwrap();
        assert_eq!(body["modeContext"], json!({"board": {"id": "b1"}}));

        assert_eq!(requests[1].mode, FeatureId::Chat);
        assert!(requests[1].mode_context.is_none());
    }

    #[tokio::test]
    async fn caller_metadata_wins_over_builder() {
        let h = harness(ScriptedBackend::new(vec![reply("a", "s-1")]));
        h.registry.register(FeatureId::Chat, || {
            let mut m = Map::new();
            m.insert("tone".into(), json!("formal"));
            m.insert("source".into(), json!("builder"));
            m
        });

        let mut extra = Map::new();
        extra.insert("source".into(), json!("caller"));
        h.manager
            .send_message(
                "hi",
                SendOptions {
                    additional_metadata: Some(extra),
                },
            )
            .await;

        let metadata = h.manager.history().await[0].metadata.clone().unwrap();
        assert_eq!(metadata["tone"], "formal");
        assert_eq!(metadata["source"], "caller");
    }

    // ── Failures ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn busy_sentinel_becomes_service_busy() {
        let h = harness(ScriptedBackend::new(vec![Ok(ChatResponse::failure("SERVICE_BUSY"))]));
        let notice = h.manager.send_message("hi", SendOptions::default()).await.unwrap();

        assert_eq!(notice.role, Role::System);
        assert!(notice.error);
        assert_eq!(h.manager.error().await, Some(ChatError::ServiceBusy));
        assert_eq!(h.manager.history().await.len(), 2);
        assert!(!h.manager.is_sending().await);
    }

    #[tokio::test]
    async fn remote_error_is_recorded() {
        let h = harness(ScriptedBackend::new(vec![Ok(ChatResponse::failure("Unknown subject"))]));
        let notice = h.manager.send_message("hi", SendOptions::default()).await.unwrap();
        assert_eq!(notice.text(), "Unknown subject");
        assert_eq!(
            h.manager.error().await,
            Some(ChatError::Remote("Unknown subject".into()))
        );
        assert!(h.manager.session().await.is_none());
    }

    #[tokio::test]
    async fn transport_failures() {
        let h = harness(ScriptedBackend::new(vec![
            Err(BackendError::Network("connection refused".into())),
            Err(BackendError::Http {
                status_code: 500,
                message: "  ".into(),
            }),
            Err(BackendError::Busy),
        ]));

        h.manager.send_message("one", SendOptions::default()).await;
        assert!(matches!(h.manager.error().await, Some(ChatError::Transport(m)) if m.contains("connection refused")));

        h.manager.send_message("two", SendOptions::default()).await;
        assert!(matches!(h.manager.error().await, Some(ChatError::Transport(m)) if m.contains("500")));

        h.manager.send_message("three", SendOptions::default()).await;
        assert_eq!(h.manager.error().await, Some(ChatError::ServiceBusy));

        assert_eq!(h.manager.history().await.len(), 6);
    }

    #[tokio::test]
    async fn empty_reply_is_an_error() {
        let h = harness(ScriptedBackend::new(vec![Ok(ChatResponse::default())]));
        let notice = h.manager.send_message("hi", SendOptions::default()).await.unwrap();
        assert!(notice.error);
        assert!(matches!(h.manager.error().await, Some(ChatError::Remote(_))));
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_new_session_twice_leaves_nothing() {
        let h = harness(ScriptedBackend::new(vec![reply("a", "s-1")]));
        h.manager.send_message("hi", SendOptions::default()).await;

        h.manager.start_new_session(Some(FeatureId::Docs)).await;
        h.manager.start_new_session(None).await;
        assert!(h.manager.session().await.is_none());
        assert!(h.manager.history().await.is_empty());
        assert!(h.manager.error().await.is_none());
    }

    #[tokio::test]
    async fn subject_change_clears_conversation() {
        let h = harness_with(ScriptedBackend::new(vec![reply("a", "s-1"), reply("b", "s-2")]), |m| {
            m.with_identity(Some("u1".into()), Some("kid-1".into()))
        });

        h.manager.send_message("hi", SendOptions::default()).await;
        h.manager.set_subject(Some("kid-1".into())).await;
        assert!(h.manager.session().await.is_some());

        h.manager.set_subject(Some("kid-2".into())).await;
        assert!(h.manager.session().await.is_none());
        assert!(h.manager.history().await.is_empty());

        h.manager.send_message("again", SendOptions::default()).await;
        let request = &h.backend.requests()[1];
        assert_eq!(request.subject_id.as_deref(), Some("kid-2"));
        assert_eq!(request.user_id.as_deref(), Some("u1"));
        assert!(request.session_id.is_none());
    }

    #[tokio::test]
    async fn first_subject_observation_keeps_empty_state() {
        let h = harness(ScriptedBackend::new(vec![]));
        let mut events = h.manager.events.subscribe();

        h.manager.set_subject(Some("kid-1".into())).await;
        assert_eq!(h.manager.subject_id().await.as_deref(), Some("kid-1"));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn subject_set_after_anonymous_session_clears_it() {
        let h = harness(ScriptedBackend::new(vec![reply("a", "s-1"), reply("b", "s-2")]));

        h.manager.send_message("hi", SendOptions::default()).await;
        assert_eq!(h.manager.session().await.unwrap().subject_id, None);

        h.manager.set_subject(Some("kid-1".into())).await;
        assert!(h.manager.session().await.is_none());
        assert!(h.manager.history().await.is_empty());

        h.manager.send_message("again", SendOptions::default()).await;
        let request = &h.backend.requests()[1];
        assert_eq!(request.subject_id.as_deref(), Some("kid-1"));
        assert!(request.session_id.is_none());
        assert_eq!(h.manager.session().await.unwrap().id, "s-2");
    }

    #[tokio::test]
    async fn clearing_the_subject_is_a_change() {
        let h = harness_with(ScriptedBackend::new(vec![reply("a", "s-1")]), |m| {
            m.with_identity(None, Some("kid-1".into()))
        });
        h.manager.send_message("hi", SendOptions::default()).await;

        h.manager.set_subject(None).await;
        assert!(h.manager.session().await.is_none());
        assert_eq!(h.manager.storage_key().await, "chat.session.anonymous.none.chat");
    }

    #[tokio::test]
    async fn load_session_replaces_history() {
        let mut stored = ChatSession::new("s-7", None, None, FeatureId::Docs);
        stored.messages = vec![ChatMessage::user("old"), ChatMessage::assistant("reply")];
        let h = harness(ScriptedBackend::new(vec![]).with_session(stored));

        assert!(h.manager.load_session("s-7").await);
        assert_eq!(h.manager.history().await.len(), 2);
        assert_eq!(h.manager.session().await.unwrap().id, "s-7");

        assert!(!h.manager.load_session("nope").await);
        assert_eq!(
            h.manager.error().await,
            Some(ChatError::SessionNotFound("nope".into()))
        );
        assert_eq!(h.manager.session().await.unwrap().id, "s-7");
    }

    #[tokio::test]
    async fn failed_load_leaves_in_flight_send_alone() {
        let gate = Arc::new(Notify::new());
        let h = harness(ScriptedBackend::gated(vec![reply("ok", "s-1")], Arc::clone(&gate)));

        let manager = Arc::clone(&h.manager);
        let pending =
            tokio::spawn(async move { manager.send_message("hi", SendOptions::default()).await });
        while !h.manager.is_sending().await {
            tokio::task::yield_now().await;
        }

        assert!(!h.manager.load_session("nope").await);
        gate.notify_one();

        let answer = pending.await.unwrap().expect("reply kept");
        assert_eq!(answer.text(), "ok");
        let history = h.manager.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].text(), "ok");
        assert_eq!(h.manager.session().await.unwrap().id, "s-1");
        assert!(!h.manager.is_sending().await);
    }

    #[tokio::test]
    async fn successful_load_discards_in_flight_reply() {
        let stored = ChatSession::new("s-7", None, None, FeatureId::Chat);
        let gate = Arc::new(Notify::new());
        let h = harness(
            ScriptedBackend::gated(vec![reply("late", "s-1")], Arc::clone(&gate)).with_session(stored),
        );

        let manager = Arc::clone(&h.manager);
        let pending =
            tokio::spawn(async move { manager.send_message("hi", SendOptions::default()).await });
        while !h.manager.is_sending().await {
            tokio::task::yield_now().await;
        }

        assert!(h.manager.load_session("s-7").await);
        gate.notify_one();

        assert!(pending.await.unwrap().is_none());
        assert_eq!(h.manager.session().await.unwrap().id, "s-7");
        assert!(h.manager.history().await.is_empty());
        assert!(!h.manager.is_sending().await);
    }

    // ── Persistence ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn session_id_is_persisted_and_restored() {
        let store = Arc::new(InMemorySessionStore::new());
        let h = harness_with(ScriptedBackend::new(vec![reply("hello", "s-1")]), |m| {
            m.with_store(Arc::clone(&store) as Arc<dyn SessionStore>)
                .with_identity(Some("u1".into()), None)
        });
        h.manager.send_message("hi", SendOptions::default()).await;
        assert_eq!(h.manager.storage_key().await, "chat.session.u1.none.chat");
        assert_eq!(
            store.get("chat.session.u1.none.chat").await.unwrap().as_deref(),
            Some("s-1")
        );

        // A fresh manager over the same store picks the session back up
        let backend = ScriptedBackend::new(vec![]).with_session(h.manager.session().await.unwrap());
        let fresh = harness_with(backend, |m| {
            m.with_store(Arc::clone(&store) as Arc<dyn SessionStore>)
                .with_identity(Some("u1".into()), None)
        });
        assert!(fresh.manager.restore().await);
        assert_eq!(fresh.manager.history().await.len(), 2);

        // Restore does nothing once a session is loaded
        assert!(!fresh.manager.restore().await);

        fresh.manager.clear_session().await;
        assert!(store.get("chat.session.u1.none.chat").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_stored_id_is_removed() {
        let store = Arc::new(InMemorySessionStore::new());
        store.set("chat.session.anonymous.none.chat", "gone").await.unwrap();

        let h = harness_with(ScriptedBackend::new(vec![]), |m| {
            m.with_store(Arc::clone(&store) as Arc<dyn SessionStore>)
        });
        assert!(!h.manager.restore().await);
        assert!(store.get("chat.session.anonymous.none.chat").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let h = harness_with(ScriptedBackend::new(vec![reply("ok", "s-1")]), |m| {
            m.with_store(Arc::new(BrokenStore))
        });
        assert!(h.manager.send_message("hi", SendOptions::default()).await.is_some());
        assert!(h.manager.error().await.is_none());
        assert!(!h.manager.restore().await);
        h.manager.clear_session().await;
    }

    #[tokio::test]
    async fn persistence_off_by_default() {
        let h = harness(ScriptedBackend::new(vec![]));
        assert!(!h.manager.persistence_enabled());
        assert!(!h.manager.restore().await);
    }

    // ── Routing and payloads ────────────────────────────────────────────

    #[tokio::test]
    async fn context_data_reaches_shared_state() {
        let mut context = Map::new();
        context.insert("program".into(), json!({"id": "P1", "name": "Morning"}));
        let h = harness(ScriptedBackend::new(vec![Ok(ChatResponse {
            context_data: Some(context),
            ..ChatResponse::reply(ChatMessage::assistant("Program created"))
        })]));

        h.manager.send_message("make a program", SendOptions::default()).await;
        assert_eq!(h.shared.get(PROGRAM_DATA).unwrap()["id"], "P1");
    }

    #[tokio::test]
    async fn typed_payload_access() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Interpretation {
            meaning: String,
        }

        let content: copanel_core::MessageContent = serde_json::from_value(json!({
            "text": "Here is what I think",
            "interpretation": {"meaning": "wants juice"}
        }))
        .unwrap();
        let h = harness(ScriptedBackend::new(vec![Ok(ChatResponse::reply(
            ChatMessage::assistant(content),
        ))]));
        h.manager.send_message("juice", SendOptions::default()).await;

        let typed: Interpretation = h
            .manager
            .last_assistant_payload_as("interpretation")
            .await
            .unwrap();
        assert_eq!(typed.meaning, "wants juice");
        assert!(h.manager.last_assistant_payload("boardGeneration").await.is_none());
        assert!(
            h.manager
                .last_assistant_payload_as::<u32>("interpretation")
                .await
                .is_none()
        );
        assert_eq!(h.manager.last_user_message().await.unwrap().text(), "juice");
    }
}
