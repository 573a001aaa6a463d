//! Assistant backend implementations for copanel.
//!
//! The session manager only sees [`copanel_core::ChatBackend`]; this crate
//! provides the HTTP client used against a real deployment.

pub mod http;

pub use http::HttpChatBackend;
