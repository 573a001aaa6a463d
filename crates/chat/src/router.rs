//! Context response router.
//!
//! Assistant responses may carry `contextData`, structured results meant for
//! a feature rather than the chat transcript. The router maps a fixed set of
//! keys onto shared-state slots and reports which cached views went stale.
//! It publishes the invalidations; it never touches a cache itself.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use copanel_core::shared_state::{BOARD_GENERATOR_DATA, INTERPRET_DATA, PROGRAM_DATA};
use copanel_core::{EventBus, SharedState, ShellEvent};
use serde_json::{Map, Value, json};
use tracing::debug;

/// A cached query the data layer should refetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    ProgramById(String),
    ProgramsForSubject(String),
    CurrentProgramForSubject(String),
    GoalById(String),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::ProgramById(id) => write!(f, "program:{id}"),
            CacheKey::ProgramsForSubject(id) => write!(f, "programs:subject:{id}"),
            CacheKey::CurrentProgramForSubject(id) => write!(f, "program:current:{id}"),
            CacheKey::GoalById(id) => write!(f, "goal:{id}"),
        }
    }
}

/// What one routing pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteOutcome {
    /// Shared-state slots written, in routing order
    pub slots_written: Vec<&'static str>,
    pub invalidations: Vec<CacheKey>,
}

impl RouteOutcome {
    pub fn is_empty(&self) -> bool {
        self.slots_written.is_empty() && self.invalidations.is_empty()
    }

    fn invalidate(&mut self, key: CacheKey) {
        if !self.invalidations.contains(&key) {
            self.invalidations.push(key);
        }
    }
}

pub struct ContextResponseRouter {
    shared: Arc<SharedState>,
    events: EventBus,
}

impl ContextResponseRouter {
    pub fn new(shared: Arc<SharedState>, events: EventBus) -> Self {
        Self { shared, events }
    }

    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Route one response's `contextData`. Unknown keys are ignored.
    pub fn route(&self, context: &Map<String, Value>, subject_id: Option<&str>) -> RouteOutcome {
        let mut outcome = RouteOutcome::default();

        if let Some(board) = present(context, "board") {
            self.shared.set(BOARD_GENERATOR_DATA, json!({ "board": board }));
            outcome.slots_written.push(BOARD_GENERATOR_DATA);
        }

        if let Some(interpret) = present(context, "interpret") {
            self.shared.set(INTERPRET_DATA, interpret.clone());
            outcome.slots_written.push(INTERPRET_DATA);
        }

        let program = present(context, "program");
        let updated = present(context, "programUpdated");
        if program.is_some() || updated.is_some() {
            if let Some(program) = program {
                self.shared.set(PROGRAM_DATA, program.clone());
                outcome.slots_written.push(PROGRAM_DATA);
            }

            let program_id = program
                .and_then(|p| id_field(p, "id"))
                .or_else(|| updated.and_then(|u| id_field(u, "programId")));
            if let Some(id) = program_id {
                outcome.invalidate(CacheKey::ProgramById(id));
            }
            if let Some(subject) = subject_id {
                outcome.invalidate(CacheKey::ProgramsForSubject(subject.to_string()));
                outcome.invalidate(CacheKey::CurrentProgramForSubject(subject.to_string()));
            }
            if let Some(goal) = updated.and_then(|u| id_field(u, "goalId")) {
                outcome.invalidate(CacheKey::GoalById(goal));
            }
        }

        if !outcome.invalidations.is_empty() {
            let keys: Vec<String> = outcome.invalidations.iter().map(ToString::to_string).collect();
            debug!(keys = ?keys, "Publishing cache invalidations");
            self.events.publish(ShellEvent::CacheInvalidated {
                keys,
                timestamp: Utc::now(),
            });
        }

        outcome
    }
}

fn present<'a>(context: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    context.get(key).filter(|v| !v.is_null())
}

/// Read an id that may be encoded as a string or a number.
fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
