//! Core API types shared across the protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Permission mode forwarded to the agent CLI.
///
/// Wire spelling is camelCase (`acceptEdits`, `bypassPermissions`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    Plan,
    AcceptEdits,
    BypassPermissions,
}

impl PermissionMode {
    /// The spelling expected by the CLI `--permission-mode` flag and stored
    /// in the settings table.
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::Plan => "plan",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "default" => Some(PermissionMode::Default),
            "plan" => Some(PermissionMode::Plan),
            "acceptEdits" => Some(PermissionMode::AcceptEdits),
            "bypassPermissions" => Some(PermissionMode::BypassPermissions),
            _ => None,
        }
    }
}

/// System prompt override: either a plain instruction string or a structured
/// spec understood by the agent (e.g. `{"type": "preset", "preset": ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Spec(Value),
}

impl SystemPrompt {
    /// The default spec: the agent's built-in preset.
    pub fn preset_default() -> Self {
        SystemPrompt::Spec(json!({"type": "preset", "preset": "claude_code"}))
    }

    /// The plain-text form, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SystemPrompt::Text(text) => Some(text),
            SystemPrompt::Spec(_) => None,
        }
    }
}

fn default_system_prompt() -> Option<SystemPrompt> {
    Some(SystemPrompt::preset_default())
}

/// One chat turn: optional conversation identity, optional working
/// directory, and the user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    pub message: String,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: Option<SystemPrompt>,
}

/// Summary of a conversation for list views
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub cwd: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Full conversation detail, including the raw transcript records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session_id: String,
    pub title: String,
    pub cwd: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// Per-user settings record. One row per user; last write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: String,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: Option<SystemPrompt>,
}

impl UserSettings {
    /// The record returned before a user has stored anything.
    pub fn defaults_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            permission_mode: PermissionMode::default(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// Body of `PUT /users/{user_id}/settings`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettingsUpdate {
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: Option<SystemPrompt>,
}

/// Body of `POST /sessions/load`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSessionsRequest {
    #[serde(default)]
    pub claude_dir: Option<String>,
}

/// Response of `POST /sessions/load`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSessionsResponse {
    pub claude_dir: String,
    pub sessions_loaded: usize,
    pub agent_runs_loaded: usize,
}

/// Body of `POST /chat/stop`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRequest {
    pub run_id: String,
}
