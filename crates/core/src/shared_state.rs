//! Shared state — a cross-feature keyed bag.
//!
//! Keys are owned by features by convention only. Writes are last-write-wins
//! and every write is announced on the event bus so feature views can react.

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::event::{EventBus, ShellEvent};

/// Slot written by the board generator's context routing.
pub const BOARD_GENERATOR_DATA: &str = "boardGeneratorData";
/// Slot written by the interpreter's context routing.
pub const INTERPRET_DATA: &str = "interpretData";
/// Slot written by the programs feature's context routing.
pub const PROGRAM_DATA: &str = "programData";

/// The shared keyed bag.
pub struct SharedState {
    slots: RwLock<HashMap<String, Value>>,
    events: EventBus,
}

impl SharedState {
    pub fn new(events: EventBus) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Read a slot.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.slots.read().unwrap().get(key).cloned()
    }

    /// Write a slot, replacing whatever was there.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.slots.write().unwrap().insert(key.clone(), value);
        tracing::debug!(key = %key, "Shared state updated");
        self.events.publish(ShellEvent::SharedStateUpdated {
            key,
            timestamp: Utc::now(),
        });
    }

    /// Remove a slot. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.slots.write().unwrap().remove(key).is_some();
        if removed {
            self.events.publish(ShellEvent::SharedStateUpdated {
                key: key.to_string(),
                timestamp: Utc::now(),
            });
        }
        removed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.read().unwrap().contains_key(key)
    }

    /// Copy of every slot, for debugging and status output.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.slots
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.slots.read().unwrap().len();
        f.debug_struct("SharedState").field("slot_count", &count).finish()
    }
}
