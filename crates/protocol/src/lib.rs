//! AgentHub Protocol
//!
//! Shared types for communication between the AgentHub server and clients.
//! Record and request types are serialized as JSON; wire events are framed
//! as server-sent events.

use uuid::Uuid;

pub mod types;
pub mod wire;

pub use types::*;
pub use wire::StreamEvent;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
