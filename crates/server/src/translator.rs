//! Per-turn stream translation
//!
//! Consumes one turn of the agent message stream and emits the ordered wire
//! events, accumulating reply text and resolving the conversation identity.
//! Exactly one terminal event (`done`, `stopped`, or `error`) ends every
//! stream; once streaming has begun, faults are converted to the terminal
//! `error` event and never propagated.
//!
//! Suspension points are exactly: awaiting the next agent message, awaiting
//! a persistence write, and awaiting the cancellation signal.

use std::future::Future;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use agenthub_agent::{extract_session_id, AgentError, AgentMessage, AgentStream, ContentBlock};
use agenthub_protocol::StreamEvent;

use crate::error::ApiError;
use crate::naming;
use crate::resolver::ResolvedTurn;
use crate::runs::RunRegistry;
use crate::store::SessionStore;

/// Everything one turn needs beyond the agent stream itself.
pub struct TurnContext {
    pub resolved: ResolvedTurn,
    pub message: String,
    pub run_id: String,
}

/// Spawn the turn task and return the ordered event stream.
///
/// `query` starts the agent; it runs inside the task so that spawn failures
/// surface as a terminal `error` event, not a transport-level fault.
pub fn spawn_turn<F>(
    store: SessionStore,
    runs: RunRegistry,
    ctx: TurnContext,
    query: F,
) -> mpsc::Receiver<StreamEvent>
where
    F: Future<Output = Result<AgentStream, AgentError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    let cancel = runs.register(&ctx.run_id);

    tokio::spawn(async move {
        if let Err(err) = run_turn(&store, &ctx, query, cancel, &tx).await {
            warn!(
                component = "translator",
                event = "turn.failed",
                run_id = %ctx.run_id,
                error = %err,
                "Turn failed; emitting terminal error event"
            );
            let _ = tx
                .send(StreamEvent::Error {
                    message: err.to_string(),
                })
                .await;
        }
        runs.remove(&ctx.run_id);
    });

    rx
}

async fn run_turn<F>(
    store: &SessionStore,
    ctx: &TurnContext,
    query: F,
    mut cancel: watch::Receiver<bool>,
    tx: &mpsc::Sender<StreamEvent>,
) -> anyhow::Result<()>
where
    F: Future<Output = Result<AgentStream, AgentError>>,
{
    let mut turn = Turn {
        store,
        ctx,
        tx,
        started_at: Utc::now(),
        title_seed: naming::title_from_message(&ctx.message),
        session_id: ctx.resolved.session_id.clone(),
        chunks: Vec::new(),
        session_announced: false,
    };

    let mut stream = query.await?;
    let mut cancel_active = true;

    loop {
        tokio::select! {
            biased;

            changed = cancel.changed(), if cancel_active => {
                match changed {
                    Ok(()) if *cancel.borrow_and_update() => {
                        return turn.stop().await;
                    }
                    Ok(()) => {}
                    // Signal sender gone; keep draining the agent stream.
                    Err(_) => cancel_active = false,
                }
            }

            message = stream.next() => {
                let Some(message) = message else { break };
                turn.handle_message(message).await?;
            }
        }
    }

    turn.finalize().await
}

struct Turn<'a> {
    store: &'a SessionStore,
    ctx: &'a TurnContext,
    tx: &'a mpsc::Sender<StreamEvent>,
    started_at: DateTime<Utc>,
    title_seed: String,
    session_id: Option<String>,
    chunks: Vec<String>,
    session_announced: bool,
}

impl Turn<'_> {
    async fn send(&self, event: StreamEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow!("event receiver dropped"))
    }

    fn title(&self) -> &str {
        self.ctx
            .resolved
            .stored_title
            .as_deref()
            .unwrap_or(&self.title_seed)
    }

    /// Emit the `session` event exactly once, as soon as an identity exists.
    async fn announce_session(&mut self) -> anyhow::Result<()> {
        if self.session_announced {
            return Ok(());
        }
        let Some(session_id) = self.session_id.clone() else {
            return Ok(());
        };
        self.session_announced = true;
        self.send(StreamEvent::Session {
            session_id,
            cwd: self.ctx.resolved.cwd.clone(),
            is_new: self.ctx.resolved.is_new,
        })
        .await
    }

    /// Adopt an identity reported by an initialization-class message. A new
    /// conversation is persisted immediately so it is discoverable before
    /// the turn finishes.
    async fn adopt_from_init(&mut self, session_id: String) -> anyhow::Result<()> {
        if self.ctx.resolved.is_new {
            self.store
                .upsert_conversation(
                    &session_id,
                    &self.title_seed,
                    &self.ctx.resolved.cwd,
                    self.started_at,
                    self.started_at,
                )
                .await?;
        }
        self.session_id = Some(session_id);
        Ok(())
    }

    async fn handle_message(&mut self, message: AgentMessage) -> anyhow::Result<()> {
        match &message {
            AgentMessage::System {
                subtype,
                session_id,
                ..
            } if subtype == "init" => {
                if self.session_id.is_none() {
                    if let Some(id) = session_id.clone() {
                        self.adopt_from_init(id).await?;
                    }
                }
                self.announce_session().await?;
            }

            AgentMessage::Assistant { content, .. } => {
                for block in content {
                    let ContentBlock::Text { text } = block else {
                        continue;
                    };
                    if text.is_empty() {
                        continue;
                    }
                    self.chunks.push(text.clone());
                    self.send(StreamEvent::Token {
                        session_id: self.session_id.clone(),
                        text: text.clone(),
                    })
                    .await?;
                }
            }

            AgentMessage::Result {
                session_id, result, ..
            } => {
                if self.session_id.is_none() {
                    if let Some(id) = session_id.clone() {
                        self.adopt_from_init(id).await?;
                    }
                }
                self.announce_session().await?;
                if self.chunks.is_empty() {
                    if let Some(result) = result {
                        if !result.is_empty() {
                            self.chunks.push(result.clone());
                        }
                    }
                }
            }

            _ => {}
        }

        // Every message is mirrored, best effort; one that projects to
        // nothing is dropped from the mirror stream, not fatally.
        if let Some(payload) = message.payload() {
            let payload_session_id =
                extract_session_id(&payload).or_else(|| self.session_id.clone());
            if self.session_id.is_none() {
                self.session_id = payload_session_id.clone();
            }
            self.send(StreamEvent::Message {
                session_id: payload_session_id,
                payload,
            })
            .await?;
        }

        Ok(())
    }

    async fn persist_final(&self, session_id: &str) -> Result<(), ApiError> {
        self.store
            .upsert_conversation(
                session_id,
                self.title(),
                &self.ctx.resolved.cwd,
                self.started_at,
                Utc::now(),
            )
            .await
    }

    /// End of stream: resolve the identity or fail, persist, emit `done`.
    async fn finalize(&mut self) -> anyhow::Result<()> {
        let Some(session_id) = self.session_id.clone() else {
            return Err(ApiError::ProtocolViolation(
                "agent did not return a session id".to_string(),
            )
            .into());
        };

        let reply: String = self.chunks.concat();
        self.persist_final(&session_id).await?;

        info!(
            component = "translator",
            event = "turn.completed",
            run_id = %self.ctx.run_id,
            session_id = %session_id,
            reply_chars = reply.chars().count(),
            "Turn completed"
        );

        self.send(StreamEvent::Done {
            session_id,
            cwd: self.ctx.resolved.cwd.clone(),
            length: reply.chars().count(),
        })
        .await
    }

    /// Explicit cancellation: persist what we have, then acknowledge.
    async fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(session_id) = self.session_id.clone() {
            if let Err(err) = self.persist_final(&session_id).await {
                warn!(
                    component = "translator",
                    event = "turn.stop_persist_failed",
                    run_id = %self.ctx.run_id,
                    error = %err,
                    "Persistence on stop failed"
                );
            }
        }

        info!(
            component = "translator",
            event = "turn.stopped",
            run_id = %self.ctx.run_id,
            session_id = ?self.session_id,
            "Turn stopped on request"
        );

        let _ = self
            .send(StreamEvent::Stopped {
                session_id: self.session_id.clone(),
            })
            .await;
        Ok(())
    }
}
