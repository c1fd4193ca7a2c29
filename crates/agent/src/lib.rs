//! AgentHub agent connector
//!
//! The external generative agent is a capability: it accepts a prompt plus
//! options and produces an ordered sequence of typed messages. This crate
//! holds the closed message type, its structural projection, and the
//! production connector that spawns the `claude` CLI.

pub mod cli;
pub mod message;

pub use cli::{AgentError, AgentStream, CliAgent, QueryOptions};
pub use message::{extract_session_id, AgentMessage, ContentBlock};
