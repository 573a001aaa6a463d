//! Chat orchestration for copanel.
//!
//! - [`registry`]: per-feature metadata builders merged into outgoing requests
//! - [`manager`]: the session lifecycle against the assistant backend
//! - [`router`]: routes structured response data into shared state
//! - [`shell`]: the service object that wires everything together

pub mod manager;
pub mod registry;
pub mod router;
pub mod shell;

pub use manager::{ChatSessionManager, SendOptions};
pub use registry::{MetadataBuilder, MetadataRegistry, RegistrationGuard};
pub use router::{CacheKey, ContextResponseRouter, RouteOutcome};
pub use shell::Shell;
