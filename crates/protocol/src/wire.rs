//! Streamed wire events for one chat turn
//!
//! Each event is one typed, ordered unit of the SSE protocol:
//! `event: <kind>` followed by a JSON `data:` payload carrying only the
//! fields of that kind. Events are ephemeral — only their effects
//! (accumulated text, resolved identity) are ever persisted.

use serde::Serialize;
use serde_json::Value;

/// One event of a turn's output stream.
///
/// Exactly one terminal event (`done`, `stopped`, or `error`) ends every
/// stream, and it is always the last event.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    /// Conversation identity announcement; precedes the first `token`.
    Session {
        session_id: String,
        cwd: String,
        is_new: bool,
    },
    /// One non-empty assistant text fragment.
    Token {
        session_id: Option<String>,
        text: String,
    },
    /// Mirror of one underlying agent message, structurally projected.
    Message {
        session_id: Option<String>,
        payload: Value,
    },
    /// Normal completion.
    Done {
        session_id: String,
        cwd: String,
        length: usize,
    },
    /// Explicit cancellation acknowledged.
    Stopped { session_id: Option<String> },
    /// The turn failed after streaming had begun.
    Error { message: String },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Session { .. } => "session",
            StreamEvent::Token { .. } => "token",
            StreamEvent::Message { .. } => "message",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Stopped { .. } => "stopped",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Done { .. } | StreamEvent::Stopped { .. } | StreamEvent::Error { .. }
        )
    }

    /// Encode as a literal SSE frame: `event: <kind>\ndata: <json>\n\n`.
    ///
    /// The server itself frames through axum's `Sse`; this encoder exists
    /// for clients and tests that need the exact byte layout.
    pub fn sse_frame(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("event: {}\ndata: {}\n\n", self.kind(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::StreamEvent;

    #[test]
    fn frame_layout() {
        let event = StreamEvent::Token {
            session_id: Some("abc".to_string()),
            text: "hi".to_string(),
        };
        assert_eq!(
            event.sse_frame(),
            "event: token\ndata: {\"session_id\":\"abc\",\"text\":\"hi\"}\n\n"
        );
    }

    #[test]
    fn payload_carries_only_event_fields() {
        let event = StreamEvent::Done {
            session_id: "abc".to_string(),
            cwd: "/tmp/proj".to_string(),
            length: 5,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"session_id": "abc", "cwd": "/tmp/proj", "length": 5})
        );
    }

    #[test]
    fn terminal_kinds() {
        assert!(StreamEvent::Error {
            message: "boom".to_string()
        }
        .is_terminal());
        assert!(StreamEvent::Stopped { session_id: None }.is_terminal());
        assert!(!StreamEvent::Session {
            session_id: "abc".to_string(),
            cwd: "/".to_string(),
            is_new: true
        }
        .is_terminal());
    }
}
