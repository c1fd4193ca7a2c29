//! Direct `claude` CLI connector
//!
//! Spawns the CLI in one-shot `--print` mode with stream-json output and
//! feeds each stdout line through `AgentMessage::from_value` into an mpsc
//! channel. Dropping the stream kills the subprocess.

use std::path::Path;
use std::process::Stdio;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::message::AgentMessage;

/// Errors that can occur while driving the agent CLI
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to spawn agent CLI: {0}")]
    Spawn(String),

    #[error("process communication error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options for one turn of the agent capability.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Conversation identity to resume, if any.
    pub resume: Option<String>,
    /// CLI permission mode spelling (`default`, `plan`, ...).
    pub permission_mode: Option<String>,
    /// Plain-text system prompt override.
    pub system_prompt: Option<String>,
    /// Ask the CLI for partial stream events.
    pub include_partial_messages: bool,
}

/// The ordered message stream of one in-flight turn.
pub struct AgentStream {
    rx: mpsc::Receiver<AgentMessage>,
    _child: Option<Child>,
}

impl AgentStream {
    /// Next message, or `None` at end of stream.
    pub async fn next(&mut self) -> Option<AgentMessage> {
        self.rx.recv().await
    }

    /// Pair a raw sender with a stream. Used by the connector's reader task
    /// and by tests that script a turn by hand.
    pub fn channel(capacity: usize) -> (mpsc::Sender<AgentMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx, _child: None })
    }

    /// Build a stream from a fixed message sequence. Test seam.
    pub fn from_messages(messages: Vec<AgentMessage>) -> Self {
        let (tx, stream) = Self::channel(messages.len().max(1));
        for message in messages {
            // Capacity covers the whole sequence; try_send cannot fail here.
            let _ = tx.try_send(message);
        }
        stream
    }

    fn attach(mut self, child: Child) -> Self {
        self._child = Some(child);
        self
    }
}

/// Launches `claude` CLI turns.
#[derive(Debug, Clone)]
pub struct CliAgent {
    binary: String,
}

impl CliAgent {
    pub fn new() -> Self {
        let binary =
            std::env::var("AGENTHUB_CLAUDE_BIN").unwrap_or_else(|_| "claude".to_string());
        Self { binary }
    }

    /// Start one turn: spawn the CLI and return its message stream.
    pub async fn query(
        &self,
        prompt: &str,
        cwd: &Path,
        options: &QueryOptions,
    ) -> Result<AgentStream, AgentError> {
        let mut args: Vec<&str> = vec![
            "--print",
            "--verbose",
            "--output-format",
            "stream-json",
        ];

        if let Some(sid) = options.resume.as_deref() {
            args.extend(["--resume", sid]);
        }
        if let Some(mode) = options.permission_mode.as_deref() {
            args.extend(["--permission-mode", mode]);
        }
        if let Some(prompt_override) = options.system_prompt.as_deref() {
            args.extend(["--append-system-prompt", prompt_override]);
        }
        if options.include_partial_messages {
            args.push("--include-partial-messages");
        }
        args.push(prompt);

        info!(
            component = "cli_agent",
            event = "agent.spawn",
            cwd = %cwd.display(),
            binary = %self.binary,
            resume = ?options.resume,
            "Spawning agent CLI"
        );

        let mut child = Command::new(&self.binary)
            .args(&args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("CLAUDE_CODE_ENTRYPOINT", "agenthub")
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Spawn(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("no stdout on child".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(
                        component = "cli_agent",
                        event = "agent.stderr",
                        line = %line,
                        "Agent CLI stderr"
                    );
                }
            });
        }

        let (tx, stream) = AgentStream::channel(256);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let value: Value = match serde_json::from_str(line) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(
                            component = "cli_agent",
                            event = "agent.line_unparsed",
                            error = %err,
                            "Skipping unparseable agent output line"
                        );
                        continue;
                    }
                };
                if tx.send(AgentMessage::from_value(value)).await.is_err() {
                    // Receiver dropped; the turn is over for us.
                    break;
                }
            }
        });

        Ok(stream.attach(child))
    }
}

impl Default for CliAgent {
    fn default() -> Self {
        Self::new()
    }
}
