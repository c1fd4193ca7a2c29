//! Typed view of the agent CLI's NDJSON message stream
//!
//! Every stdout line parses into one `AgentMessage`. The variant set is
//! closed: anything unrecognized lands in `Unknown` with its raw value
//! preserved, so the mirror stream never loses data.

use serde_json::{json, Map, Value};

/// One content block inside an assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        is_error: bool,
        content: Option<Value>,
    },
    Unknown(Value),
}

impl ContentBlock {
    pub fn from_value(value: &Value) -> Self {
        match value.get("type").and_then(|t| t.as_str()) {
            Some("text") => match value.get("text").and_then(|t| t.as_str()) {
                Some(text) => ContentBlock::Text {
                    text: text.to_string(),
                },
                None => ContentBlock::Unknown(value.clone()),
            },
            Some("thinking") => ContentBlock::Thinking {
                thinking: value
                    .get("thinking")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
                signature: value
                    .get("signature")
                    .and_then(|s| s.as_str())
                    .map(str::to_string),
            },
            Some("tool_use") => {
                let (Some(id), Some(name)) = (
                    value.get("id").and_then(|i| i.as_str()),
                    value.get("name").and_then(|n| n.as_str()),
                ) else {
                    return ContentBlock::Unknown(value.clone());
                };
                ContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: value.get("input").cloned().unwrap_or(Value::Null),
                }
            }
            Some("tool_result") => {
                let Some(tool_use_id) = value.get("tool_use_id").and_then(|i| i.as_str()) else {
                    return ContentBlock::Unknown(value.clone());
                };
                ContentBlock::ToolResult {
                    tool_use_id: tool_use_id.to_string(),
                    is_error: value
                        .get("is_error")
                        .and_then(|e| e.as_bool())
                        .unwrap_or(false),
                    content: value.get("content").cloned(),
                }
            }
            _ => ContentBlock::Unknown(value.clone()),
        }
    }

    /// Structural projection used by the generic `message` mirror events.
    pub fn to_payload(&self) -> Value {
        match self {
            ContentBlock::Text { text } => json!({"type": "text", "text": text}),
            ContentBlock::Thinking {
                thinking,
                signature,
            } => json!({
                "type": "thinking",
                "thinking": thinking,
                "signature": signature,
            }),
            ContentBlock::ToolUse { id, name, input } => json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                is_error,
                content,
            } => {
                let mut payload = Map::new();
                payload.insert("type".into(), json!("tool_result"));
                payload.insert("tool_use_id".into(), json!(tool_use_id));
                payload.insert("is_error".into(), json!(is_error));
                if let Some(content) = content {
                    payload.insert("content".into(), content.clone());
                }
                Value::Object(payload)
            }
            ContentBlock::Unknown(value) => {
                if value.is_object() {
                    value.clone()
                } else {
                    json!({"type": "unknown", "value": value})
                }
            }
        }
    }
}

/// One message of the agent stream, dispatched on its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    System {
        subtype: String,
        session_id: Option<String>,
        data: Value,
    },
    User {
        content: Value,
        parent_tool_use_id: Option<String>,
    },
    Assistant {
        model: Option<String>,
        content: Vec<ContentBlock>,
        parent_tool_use_id: Option<String>,
        session_id: Option<String>,
    },
    Result {
        subtype: String,
        session_id: Option<String>,
        is_error: bool,
        num_turns: Option<u64>,
        duration_ms: Option<u64>,
        total_cost_usd: Option<f64>,
        usage: Option<Value>,
        result: Option<String>,
    },
    Stream {
        session_id: Option<String>,
        event: Value,
    },
    Unknown(Value),
}

fn opt_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

impl AgentMessage {
    pub fn from_value(value: Value) -> Self {
        match value.get("type").and_then(|t| t.as_str()) {
            Some("system") => AgentMessage::System {
                subtype: opt_str(&value, "subtype").unwrap_or_default(),
                session_id: opt_str(&value, "session_id"),
                data: value,
            },
            Some("user") => AgentMessage::User {
                content: value
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .or_else(|| value.get("content"))
                    .cloned()
                    .unwrap_or(Value::Null),
                parent_tool_use_id: opt_str(&value, "parent_tool_use_id"),
            },
            Some("assistant") => {
                let message = value.get("message");
                let content = message
                    .and_then(|m| m.get("content"))
                    .and_then(|c| c.as_array())
                    .map(|blocks| blocks.iter().map(ContentBlock::from_value).collect())
                    .unwrap_or_default();
                AgentMessage::Assistant {
                    model: message.and_then(|m| opt_str(m, "model")),
                    content,
                    parent_tool_use_id: opt_str(&value, "parent_tool_use_id"),
                    session_id: opt_str(&value, "session_id"),
                }
            }
            Some("result") => AgentMessage::Result {
                subtype: opt_str(&value, "subtype").unwrap_or_default(),
                session_id: opt_str(&value, "session_id"),
                is_error: value
                    .get("is_error")
                    .and_then(|e| e.as_bool())
                    .unwrap_or(false),
                num_turns: value.get("num_turns").and_then(|n| n.as_u64()),
                duration_ms: value.get("duration_ms").and_then(|d| d.as_u64()),
                total_cost_usd: value.get("total_cost_usd").and_then(|c| c.as_f64()),
                usage: value.get("usage").cloned(),
                result: opt_str(&value, "result"),
            },
            Some("stream_event") => AgentMessage::Stream {
                session_id: opt_str(&value, "session_id"),
                event: value.get("event").cloned().unwrap_or(Value::Null),
            },
            _ => AgentMessage::Unknown(value),
        }
    }

    /// The identity this message reports, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            AgentMessage::System { session_id, .. }
            | AgentMessage::Assistant { session_id, .. }
            | AgentMessage::Result { session_id, .. }
            | AgentMessage::Stream { session_id, .. } => session_id.as_deref(),
            AgentMessage::User { .. } | AgentMessage::Unknown(_) => None,
        }
    }

    /// Total structural projection for the `message` mirror stream.
    ///
    /// `None` only when there is nothing structural to mirror; such a
    /// message is dropped from the mirror stream, not fatally.
    pub fn payload(&self) -> Option<Value> {
        match self {
            AgentMessage::System {
                subtype,
                session_id,
                data,
            } => {
                let mut payload = Map::new();
                payload.insert("type".into(), json!("system"));
                payload.insert("subtype".into(), json!(subtype));
                payload.insert("data".into(), data.clone());
                if let Some(id) = session_id {
                    payload.insert("session_id".into(), json!(id));
                }
                Some(Value::Object(payload))
            }
            AgentMessage::User {
                content,
                parent_tool_use_id,
            } => {
                let mut payload = Map::new();
                payload.insert("type".into(), json!("user"));
                payload.insert("content".into(), content.clone());
                if let Some(id) = parent_tool_use_id {
                    payload.insert("parent_tool_use_id".into(), json!(id));
                }
                Some(Value::Object(payload))
            }
            AgentMessage::Assistant {
                model,
                content,
                parent_tool_use_id,
                session_id,
            } => {
                let mut payload = Map::new();
                payload.insert("type".into(), json!("assistant"));
                payload.insert("model".into(), json!(model));
                payload.insert(
                    "content".into(),
                    Value::Array(content.iter().map(ContentBlock::to_payload).collect()),
                );
                if let Some(id) = parent_tool_use_id {
                    payload.insert("parent_tool_use_id".into(), json!(id));
                }
                if let Some(id) = session_id {
                    payload.insert("session_id".into(), json!(id));
                }
                Some(Value::Object(payload))
            }
            AgentMessage::Result {
                subtype,
                session_id,
                is_error,
                num_turns,
                duration_ms,
                total_cost_usd,
                usage,
                result,
            } => {
                let mut payload = Map::new();
                payload.insert("type".into(), json!("result"));
                payload.insert("subtype".into(), json!(subtype));
                payload.insert("is_error".into(), json!(is_error));
                if let Some(id) = session_id {
                    payload.insert("session_id".into(), json!(id));
                }
                if let Some(turns) = num_turns {
                    payload.insert("num_turns".into(), json!(turns));
                }
                if let Some(ms) = duration_ms {
                    payload.insert("duration_ms".into(), json!(ms));
                }
                if let Some(cost) = total_cost_usd {
                    payload.insert("total_cost_usd".into(), json!(cost));
                }
                if let Some(usage) = usage {
                    payload.insert("usage".into(), usage.clone());
                }
                if let Some(result) = result {
                    payload.insert("result".into(), json!(result));
                }
                Some(Value::Object(payload))
            }
            AgentMessage::Stream { session_id, event } => Some(json!({
                "type": "stream_event",
                "session_id": session_id,
                "event": event,
            })),
            AgentMessage::Unknown(value) => match value {
                Value::Null => None,
                Value::Object(_) => Some(value.clone()),
                other => Some(json!({"type": "unknown", "value": other})),
            },
        }
    }
}

/// Find a `session_id`/`sessionId` string anywhere inside a payload.
///
/// Breadth-first over objects and arrays; first non-empty hit wins.
pub fn extract_session_id(payload: &Value) -> Option<String> {
    let mut stack = vec![payload];
    while let Some(current) = stack.pop() {
        match current {
            Value::Object(map) => {
                for key in ["session_id", "sessionId"] {
                    if let Some(Value::String(id)) = map.get(key) {
                        if !id.is_empty() {
                            return Some(id.clone());
                        }
                    }
                }
                stack.extend(map.values());
            }
            Value::Array(items) => stack.extend(items),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_init_system_message() {
        let line = json!({
            "type": "system",
            "subtype": "init",
            "session_id": "sess-1",
            "cwd": "/tmp/proj",
        });
        match AgentMessage::from_value(line) {
            AgentMessage::System {
                subtype,
                session_id,
                data,
            } => {
                assert_eq!(subtype, "init");
                assert_eq!(session_id.as_deref(), Some("sess-1"));
                assert_eq!(data.get("cwd").and_then(|c| c.as_str()), Some("/tmp/proj"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn parses_assistant_content_blocks() {
        let line = json!({
            "type": "assistant",
            "session_id": "sess-1",
            "message": {
                "model": "claude-x",
                "content": [
                    {"type": "text", "text": "hello"},
                    {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "ls"}},
                    {"type": "sparkle"},
                ],
            },
        });
        let AgentMessage::Assistant { model, content, .. } = AgentMessage::from_value(line) else {
            panic!("expected assistant");
        };
        assert_eq!(model.as_deref(), Some("claude-x"));
        assert_eq!(content.len(), 3);
        assert_eq!(
            content[0],
            ContentBlock::Text {
                text: "hello".to_string()
            }
        );
        assert!(matches!(content[1], ContentBlock::ToolUse { .. }));
        assert!(matches!(content[2], ContentBlock::Unknown(_)));
    }

    #[test]
    fn parses_result_message() {
        let line = json!({
            "type": "result",
            "subtype": "success",
            "session_id": "sess-1",
            "is_error": false,
            "num_turns": 2,
            "result": "done",
        });
        let AgentMessage::Result {
            session_id, result, ..
        } = AgentMessage::from_value(line)
        else {
            panic!("expected result");
        };
        assert_eq!(session_id.as_deref(), Some("sess-1"));
        assert_eq!(result.as_deref(), Some("done"));
    }

    #[test]
    fn unknown_type_is_preserved() {
        let line = json!({"type": "telemetry", "value": 42});
        let message = AgentMessage::from_value(line.clone());
        assert_eq!(message, AgentMessage::Unknown(line.clone()));
        assert_eq!(message.payload(), Some(line));
    }

    #[test]
    fn scalar_unknown_projects_with_fallback() {
        let message = AgentMessage::Unknown(json!("plain line"));
        assert_eq!(
            message.payload(),
            Some(json!({"type": "unknown", "value": "plain line"}))
        );
        assert_eq!(AgentMessage::Unknown(Value::Null).payload(), None);
    }

    #[test]
    fn extracts_nested_session_id() {
        let payload = json!({
            "event": {"items": [{"meta": {"sessionId": "deep-1"}}]},
        });
        assert_eq!(extract_session_id(&payload).as_deref(), Some("deep-1"));
        assert_eq!(extract_session_id(&json!({"other": 1})), None);
    }
}
