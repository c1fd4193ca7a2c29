//! AgentHub Server
//!
//! Streaming chat backend for the Claude agent CLI: durable named
//! conversations streamed over SSE, backed by a transcript-rebuildable
//! session index.

mod auth;
mod bootstrap;
mod config;
mod error;
mod logging;
mod naming;
mod resolver;
mod routes;
mod runs;
mod store;
mod transcript;
mod translator;

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use agenthub_agent::CliAgent;

use crate::config::{Args, Config};
use crate::routes::AppState;
use crate::runs::RunRegistry;
use crate::store::SessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args(Args::parse())?;
    let _logging = logging::init_logging(config.log_dir.as_deref())?;

    info!(
        component = "main",
        event = "server.starting",
        claude_root = %config.claude_root.display(),
        db = %config.db_path.display(),
        "Starting AgentHub server"
    );

    let store = SessionStore::new(config.db_path.clone());
    store.init().await?;

    // Best effort at startup; the explicit /sessions/load route still
    // surfaces a missing root as NotFound.
    match bootstrap::bootstrap(&store, &config.claude_root).await {
        Ok(stats) => info!(
            component = "main",
            event = "server.bootstrap_complete",
            sessions = stats.sessions,
            agent_runs = stats.agent_runs,
            "Startup bootstrap complete"
        ),
        Err(err) => warn!(
            component = "main",
            event = "server.bootstrap_skipped",
            error = %err,
            "Startup bootstrap skipped"
        ),
    }

    let bind = config.bind;
    let state = Arc::new(AppState {
        store,
        runs: RunRegistry::new(),
        agent: CliAgent::new(),
        config,
    });
    let app = routes::router(state);

    info!(
        component = "main",
        event = "server.listening",
        addr = %bind,
        "Listening"
    );

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
