// Re-export core modules for compatibility
pub use chinwag_core::{chatlog, events, net, rooms, users};

// Core types are re-exported, but bus events (with EventBus) remain here for
// platform-specific functionality
pub mod types {
    pub use chinwag_core::types::*;
    pub mod events;
}

// Platform-specific modules remain here
pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod presence;
pub mod room;
pub mod socket;

pub mod test_utils;
