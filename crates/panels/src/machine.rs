//! The panel/feature state machine.
//!
//! Navigation is the only way the active feature changes. `navigate` closes
//! the outgoing panel at once and arms a single-slot timer; the incoming
//! feature becomes active (and its panel opens) when the timer fires. Callers
//! drive the timer with [`PanelStateMachine::tick`] or
//! [`PanelStateMachine::settle`].

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use copanel_config::AppConfig;
use copanel_core::{
    EventBus, Feature, FeatureId, FeatureTable, LogicalPosition, PhysicalEdge, ShellEvent,
    TextDirection,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::panel::{PanelPhase, PanelState};
use crate::timer::TransitionSlot;

/// Owns panel state and the active feature.
pub struct PanelStateMachine {
    table: FeatureTable,
    direction: TextDirection,
    transition: Duration,
    panels: HashMap<FeatureId, PanelState>,
    active: watch::Sender<FeatureId>,
    current_path: String,
    pending: TransitionSlot<FeatureId>,
    events: EventBus,
}

impl PanelStateMachine {
    pub fn new(
        table: FeatureTable,
        direction: TextDirection,
        transition: Duration,
        events: EventBus,
    ) -> Self {
        let (active, _) = watch::channel(FeatureId::Chat);
        Self {
            table,
            direction,
            transition,
            panels: HashMap::new(),
            active,
            current_path: "/".into(),
            pending: TransitionSlot::new(),
            events,
        }
    }

    /// Build from the `[panels]` section of the configuration.
    pub fn from_config(config: &AppConfig, events: EventBus) -> Self {
        Self::new(
            config.feature_table(),
            config.panels.direction,
            config.panels.transition_duration(),
            events,
        )
    }

    /// Record a path write and start a transition if it implies a different feature.
    pub fn navigate(&mut self, path: &str) {
        self.current_path = path.to_string();
        self.events.publish(ShellEvent::NavigationRequested {
            path: path.to_string(),
            timestamp: Utc::now(),
        });

        let target = self.table.resolve(path);
        let current = self.active_feature();

        match self.pending.pending() {
            Some(pending) if pending == target => {
                debug!(feature = %target, "Transition already pending");
                return;
            }
            Some(pending) if target == current => {
                self.pending.cancel();
                info!(cancelled = %pending, feature = %current, "Navigated back, transition cancelled");
                if current != FeatureId::Chat && self.panels.contains_key(&current) {
                    self.open_panel(current, None);
                }
                return;
            }
            None if target == current => return,
            _ => {}
        }

        if self.panels.get(&current).is_some_and(|p| p.is_open) {
            self.close_panel(current);
        }

        if let Some(replaced) = self.pending.schedule(target, self.transition) {
            debug!(replaced = %replaced, feature = %target, "Pending transition replaced");
        } else {
            debug!(from = %current, to = %target, "Transition scheduled");
        }
    }

    /// Navigate to a feature's route prefix.
    pub fn set_active_feature(&mut self, id: FeatureId) {
        let Some(prefix) = self.feature(id).map(|f| f.path_prefix.clone()) else {
            return;
        };
        self.navigate(&prefix);
    }

    /// Like [`set_active_feature`](Self::set_active_feature), from an untyped name.
    pub fn set_active_feature_by_name(&mut self, name: &str) {
        match name.parse::<FeatureId>() {
            Ok(id) => self.set_active_feature(id),
            Err(e) => warn!(error = %e, "Ignoring feature switch"),
        }
    }

    /// Fire the pending transition if it is due. Returns the newly active feature.
    pub fn tick(&mut self) -> Option<FeatureId> {
        let target = self.pending.poll()?;
        self.complete_transition(target);
        Some(target)
    }

    /// Wait for the pending transition (if any) and apply it.
    pub async fn settle(&mut self) -> Option<FeatureId> {
        let deadline = self.pending.deadline()?;
        tokio::time::sleep_until(deadline).await;
        self.tick()
    }

    fn complete_transition(&mut self, target: FeatureId) {
        self.active.send_replace(target);
        if target != FeatureId::Chat {
            self.open_panel(target, None);
        }
        info!(feature = %target, "Feature activated");
        self.events.publish(ShellEvent::FeatureActivated {
            feature: target,
            timestamp: Utc::now(),
        });
    }

    /// Open a feature's panel. Without a size, the remembered or default size is used.
    pub fn open_panel(&mut self, id: FeatureId, size: Option<f32>) {
        if id == FeatureId::Chat {
            debug!("Chat has no panel");
            return;
        }
        let Some(feature) = self.feature(id) else {
            return;
        };
        let (default_size, position) = (feature.default_size, feature.position);
        let requested = size.map(|s| feature.clamp_size(s));

        let panel = self.panels.entry(id).or_insert(PanelState {
            is_open: false,
            size: default_size,
            position,
        });
        panel.is_open = true;
        if let Some(size) = requested {
            panel.size = size;
        }
        let panel = *panel;
        self.publish_panel(id, panel);
    }

    pub fn close_panel(&mut self, id: FeatureId) {
        if let Some(panel) = self.panels.get_mut(&id) {
            if !panel.is_open {
                return;
            }
            panel.is_open = false;
            let panel = *panel;
            self.publish_panel(id, panel);
        }
    }

    pub fn toggle_panel(&mut self, id: FeatureId) {
        if self.panels.get(&id).is_some_and(|p| p.is_open) {
            self.close_panel(id);
        } else {
            self.open_panel(id, None);
        }
    }

    /// Resize a panel that has been opened at least once. The size is clamped
    /// into the feature's bounds; returns the applied size.
    pub fn set_panel_size(&mut self, id: FeatureId, size: f32) -> Option<f32> {
        let clamped = self.feature(id)?.clamp_size(size);
        let Some(panel) = self.panels.get_mut(&id) else {
            debug!(feature = %id, "Resize ignored for a panel that was never opened");
            return None;
        };
        panel.size = clamped;
        let panel = *panel;
        self.publish_panel(id, panel);
        Some(clamped)
    }

    fn publish_panel(&self, id: FeatureId, panel: PanelState) {
        debug!(feature = %id, is_open = panel.is_open, size = panel.size, "Panel changed");
        self.events.publish(ShellEvent::PanelChanged {
            feature: id,
            is_open: panel.is_open,
            size: panel.size,
            timestamp: Utc::now(),
        });
    }

    fn feature(&self, id: FeatureId) -> Option<&Feature> {
        let feature = self.table.get(id);
        if feature.is_none() {
            warn!(feature = %id, "Feature missing from the configured feature table");
        }
        feature
    }

    pub fn physical_position(&self, position: LogicalPosition) -> PhysicalEdge {
        position.to_physical(self.direction)
    }

    pub fn set_direction(&mut self, direction: TextDirection) {
        self.direction = direction;
    }

    pub fn panel(&self, id: FeatureId) -> Option<&PanelState> {
        self.panels.get(&id)
    }

    pub fn phase(&self, id: FeatureId) -> PanelPhase {
        PanelPhase::of(self.panels.get(&id))
    }

    pub fn active_feature(&self) -> FeatureId {
        *self.active.borrow()
    }

    pub fn is_transitioning(&self) -> bool {
        self.pending.is_pending()
    }

    /// Target of the pending transition, if any.
    pub fn pending_feature(&self) -> Option<FeatureId> {
        self.pending.pending()
    }

    /// When the pending transition is due.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.deadline()
    }

    pub fn current_path(&self) -> &str {
        &self.current_path
    }

    pub fn feature_table(&self) -> &FeatureTable {
        &self.table
    }

    /// Receiver that observes every completed feature switch.
    pub fn subscribe(&self) -> watch::Receiver<FeatureId> {
        self.active.subscribe()
    }
}

impl std::fmt::Debug for PanelStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelStateMachine")
            .field("active", &self.active_feature())
            .field("pending", &self.pending.pending())
            .field("current_path", &self.current_path)
            .field("panels", &self.panels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSITION: Duration = Duration::from_millis(300);

    fn machine() -> PanelStateMachine {
        PanelStateMachine::new(
            FeatureTable::default(),
            TextDirection::Ltr,
            TRANSITION,
            EventBus::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_opens_panel_after_transition() {
        let mut m = machine();
        m.navigate("/boards/new");
        assert!(m.is_transitioning());
        assert_eq!(m.active_feature(), FeatureId::Chat);
        assert_eq!(m.phase(FeatureId::Boards), PanelPhase::Idle);

        tokio::time::advance(Duration::from_millis(299)).await;
        assert_eq!(m.tick(), None);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(m.tick(), Some(FeatureId::Boards));
        assert!(!m.is_transitioning());
        assert_eq!(m.active_feature(), FeatureId::Boards);

        let panel = m.panel(FeatureId::Boards).unwrap();
        assert!(panel.is_open);
        assert_eq!(panel.size, 55.0);
        assert_eq!(panel.position, LogicalPosition::End);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_navigation_only_last_target_opens() {
        let mut m = machine();
        m.navigate("/boards");
        m.settle().await;
        assert_eq!(m.phase(FeatureId::Boards), PanelPhase::Open);

        // A -> B -> C within one transition window
        m.navigate("/interpret");
        assert_eq!(m.phase(FeatureId::Boards), PanelPhase::Closed);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(m.tick(), None);
        m.navigate("/docs");

        assert_eq!(m.settle().await, Some(FeatureId::Docs));
        assert_eq!(m.active_feature(), FeatureId::Docs);
        assert_eq!(m.phase(FeatureId::Docs), PanelPhase::Open);
        assert_eq!(m.phase(FeatureId::Boards), PanelPhase::Closed);
        assert_ne!(m.phase(FeatureId::Interpret), PanelPhase::Open);

        // Nothing else fires later
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(m.tick(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn navigating_back_cancels_pending_transition() {
        let mut m = machine();
        m.navigate("/boards");
        m.settle().await;

        m.navigate("/docs");
        assert!(m.is_transitioning());
        m.navigate("/boards/42");
        assert!(!m.is_transitioning());
        assert_eq!(m.active_feature(), FeatureId::Boards);
        assert_eq!(m.phase(FeatureId::Boards), PanelPhase::Open);

        tokio::time::advance(TRANSITION * 2).await;
        assert_eq!(m.tick(), None);
        assert_eq!(m.phase(FeatureId::Docs), PanelPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn same_feature_navigation_is_not_a_transition() {
        let mut m = machine();
        m.navigate("/boards");
        m.settle().await;
        m.navigate("/boards/7?tab=symbols");
        assert!(!m.is_transitioning());
        assert_eq!(m.current_path(), "/boards/7?tab=symbols");
    }

    #[tokio::test(start_paused = true)]
    async fn chat_target_opens_no_panel() {
        let mut m = machine();
        m.navigate("/programs");
        m.settle().await;
        m.navigate("/somewhere/else");
        assert_eq!(m.settle().await, Some(FeatureId::Chat));
        assert_eq!(m.phase(FeatureId::Programs), PanelPhase::Closed);
        assert_eq!(m.phase(FeatureId::Chat), PanelPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn remembered_size_survives_switches() {
        let mut m = machine();
        m.set_active_feature(FeatureId::Interpret);
        m.settle().await;
        assert_eq!(m.set_panel_size(FeatureId::Interpret, 90.0), Some(60.0));

        m.set_active_feature(FeatureId::Docs);
        m.settle().await;
        m.set_active_feature_by_name("interpret");
        m.settle().await;

        let panel = m.panel(FeatureId::Interpret).unwrap();
        assert!(panel.is_open);
        assert_eq!(panel.size, 60.0);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_feature_name_is_ignored() {
        let mut m = machine();
        m.set_active_feature_by_name("spreadsheets");
        assert!(!m.is_transitioning());
        assert_eq!(m.current_path(), "/");
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_completed_switches() {
        let mut m = machine();
        let mut rx = m.subscribe();
        m.navigate("/docs");
        assert!(!rx.has_changed().unwrap());
        m.settle().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), FeatureId::Docs);
    }

    #[tokio::test]
    async fn panel_events_are_published() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let mut m = PanelStateMachine::new(
            FeatureTable::default(),
            TextDirection::Ltr,
            TRANSITION,
            events,
        );

        m.open_panel(FeatureId::Boards, Some(10.0));
        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            ShellEvent::PanelChanged {
                feature,
                is_open,
                size,
                ..
            } => {
                assert_eq!(*feature, FeatureId::Boards);
                assert!(*is_open);
                assert_eq!(*size, 30.0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn toggle_and_close() {
        let mut m = machine();
        m.toggle_panel(FeatureId::Docs);
        assert_eq!(m.phase(FeatureId::Docs), PanelPhase::Open);
        m.toggle_panel(FeatureId::Docs);
        assert_eq!(m.phase(FeatureId::Docs), PanelPhase::Closed);
        m.close_panel(FeatureId::Docs);
        assert_eq!(m.phase(FeatureId::Docs), PanelPhase::Closed);
    }

    #[test]
    fn resize_requires_an_opened_panel() {
        let mut m = machine();
        assert_eq!(m.set_panel_size(FeatureId::Boards, 50.0), None);
        m.open_panel(FeatureId::Boards, None);
        assert_eq!(m.set_panel_size(FeatureId::Boards, 10.0), Some(30.0));
    }

    #[test]
    fn physical_edges_follow_direction() {
        let mut m = machine();
        assert_eq!(m.physical_position(LogicalPosition::Start), PhysicalEdge::Left);
        m.set_direction(TextDirection::Rtl);
        assert_eq!(m.physical_position(LogicalPosition::Start), PhysicalEdge::Right);
        assert_eq!(m.physical_position(LogicalPosition::End), PhysicalEdge::Left);
        assert_eq!(m.physical_position(LogicalPosition::Bottom), PhysicalEdge::Bottom);
    }

    #[test]
    fn missing_feature_is_a_no_op() {
        let table = FeatureTable::new(
            FeatureTable::default()
                .iter()
                .filter(|f| f.feature_id != FeatureId::Docs)
                .cloned()
                .collect(),
        );
        let mut m = PanelStateMachine::new(
            table,
            TextDirection::Ltr,
            TRANSITION,
            EventBus::default(),
        );
        m.set_active_feature(FeatureId::Docs);
        m.open_panel(FeatureId::Docs, None);
        assert!(!m.is_transitioning());
        assert_eq!(m.phase(FeatureId::Docs), PanelPhase::Idle);
    }
}
