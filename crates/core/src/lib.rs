//! # copanel core
//!
//! Domain types, traits, and error definitions for the copanel assistant
//! shell. This crate has **no framework dependencies** — it defines the model
//! that every other crate builds against.
//!
//! ## Layout
//!
//! - [`feature`]: the static feature table, logical panel positions and text
//!   direction
//! - [`message`] / [`session`]: chat messages and the session record
//! - [`backend`]: the assistant backend trait and its wire types
//! - [`store`]: the session-id persistence trait
//! - [`shared_state`]: the cross-feature keyed bag
//! - [`event`]: the broadcast event bus used for subscribe/notify

pub mod backend;
pub mod error;
pub mod event;
pub mod feature;
pub mod message;
pub mod session;
pub mod shared_state;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use backend::{ChatBackend, ChatRequest, ChatResponse, ReplyType, SessionEnvelope};
pub use error::{BackendError, ChatError, PersistenceError};
pub use event::{EventBus, ShellEvent};
pub use feature::{Feature, FeatureId, FeatureTable, LogicalPosition, PhysicalEdge, TextDirection};
pub use message::{ChatMessage, MessageContent, Role};
pub use session::{ChatSession, SessionStatus};
pub use shared_state::SharedState;
pub use store::{SessionStore, storage_key};
