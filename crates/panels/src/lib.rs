//! Panel/feature state machine for copanel.
//!
//! Derives the active feature from the navigation path and keeps panel
//! visibility and size in sync with it. Feature switches go through a
//! debounced transition: the outgoing panel closes immediately, the incoming
//! one opens once the transition delay elapses, and only the most recent
//! navigation ever completes.

pub mod machine;
pub mod panel;
pub mod timer;

pub use machine::PanelStateMachine;
pub use panel::{PanelPhase, PanelState};
pub use timer::TransitionSlot;
