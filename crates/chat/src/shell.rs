//! The shell service object.
//!
//! Built once at startup and handed to every consumer. It owns the event
//! bus, the shared state, the panel state machine, the metadata registry and
//! the chat session manager, and wires the active-feature channel from the
//! panels into the registry.
//!
//! Navigation arms a background task that fires the pending transition at
//! its deadline. At most one such task is alive; a newer navigation aborts
//! the previous one.

use std::sync::{Arc, Mutex};

use copanel_config::AppConfig;
use copanel_core::{
    ChatBackend, ChatMessage, EventBus, FeatureId, SessionStore, SharedState, ShellEvent,
};
use copanel_panels::PanelStateMachine;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::manager::{ChatSessionManager, SendOptions};
use crate::registry::MetadataRegistry;
use crate::router::ContextResponseRouter;

pub struct Shell {
    config: AppConfig,
    events: EventBus,
    shared: Arc<SharedState>,
    panels: Arc<Mutex<PanelStateMachine>>,
    transition_task: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<MetadataRegistry>,
    chat: Arc<ChatSessionManager>,
}

impl Shell {
    /// Assemble the shell. Session ids are persisted only when `store` is given.
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn ChatBackend>,
        store: Option<Arc<dyn SessionStore>>,
    ) -> Self {
        let events = EventBus::default();
        let shared = Arc::new(SharedState::new(events.clone()));
        let panels = PanelStateMachine::from_config(&config, events.clone());
        let registry = Arc::new(MetadataRegistry::new(panels.subscribe()));
        let router = ContextResponseRouter::new(Arc::clone(&shared), events.clone());

        let mut chat = ChatSessionManager::new(backend, Arc::clone(&registry), router, events.clone())
            .with_reply_type(config.backend.reply_type)
            .with_identity(
                config.session.user_id.clone(),
                config.session.subject_id.clone(),
            );
        if let Some(store) = store {
            chat = chat.with_store(store);
        }

        info!(
            persist = chat.persistence_enabled(),
            direction = ?config.panels.direction,
            "Shell assembled"
        );

        Self {
            config,
            events,
            shared,
            panels: Arc::new(Mutex::new(panels)),
            transition_task: Mutex::new(None),
            registry,
            chat: Arc::new(chat),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ShellEvent>> {
        self.events.subscribe()
    }

    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    pub fn chat(&self) -> &Arc<ChatSessionManager> {
        &self.chat
    }

    /// Run `f` against the panel state machine.
    ///
    /// Transitions scheduled from inside `f` are still applied on the next
    /// shell call, but only [`navigate`](Self::navigate) and
    /// [`switch_to`](Self::switch_to) arm the background timer.
    pub fn with_panels<R>(&self, f: impl FnOnce(&mut PanelStateMachine) -> R) -> R {
        f(&mut self.panels.lock().unwrap())
    }

    /// The active feature, after applying any transition that is already due.
    pub fn active_feature(&self) -> FeatureId {
        self.with_panels(|p| {
            p.tick();
            p.active_feature()
        })
    }

    pub fn navigate(&self, path: &str) {
        self.with_panels(|p| p.navigate(path));
        self.arm_transition();
    }

    /// Wait until no transition is pending. Returns the active feature when
    /// a transition was pending on entry.
    pub async fn settle(&self) -> Option<FeatureId> {
        let mut waited = false;
        while let Some(deadline) = self.with_panels(|p| p.deadline()) {
            waited = true;
            tokio::time::sleep_until(deadline).await;
            self.with_panels(|p| p.tick());
        }
        waited.then(|| self.active_feature())
    }

    /// Navigate to `feature` and wait for the transition to complete.
    pub async fn switch_to(&self, feature: FeatureId) -> FeatureId {
        self.with_panels(|p| p.set_active_feature(feature));
        self.arm_transition();
        self.settle().await;
        self.active_feature()
    }

    /// [`switch_to`](Self::switch_to), then pick up the feature's stored
    /// session when no conversation is live. A live conversation follows
    /// the user across features.
    pub async fn switch_feature(&self, feature: FeatureId) -> FeatureId {
        let active = self.switch_to(feature).await;
        if self.chat.restore().await {
            debug!(feature = %active, "Restored stored session for feature");
        }
        active
    }

    /// Send a message through the chat manager with default options.
    pub async fn send(&self, text: &str) -> Option<ChatMessage> {
        self.active_feature();
        self.chat.send_message(text, SendOptions::default()).await
    }

    /// Replace the transition task with one that fires the pending deadline.
    fn arm_transition(&self) {
        let mut slot = self.transition_task.lock().unwrap();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let Some(mut deadline) = self.with_panels(|p| p.deadline()) else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            debug!("No runtime; transition applies on the next shell call");
            return;
        };

        let panels = Arc::clone(&self.panels);
        *slot = Some(runtime.spawn(async move {
            loop {
                tokio::time::sleep_until(deadline).await;
                let next = {
                    let mut panels = panels.lock().unwrap();
                    panels.tick();
                    panels.deadline()
                };
                match next {
                    Some(later) => deadline = later,
                    None => break,
                }
            }
        }));
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        if let Some(task) = self.transition_task.lock().unwrap().take() {
            task.abort();
        }
    }
}
