pub mod chat;
pub mod features;
pub mod onboard;
pub mod status;
pub mod suggest;
