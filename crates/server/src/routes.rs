//! HTTP surface
//!
//! One streaming endpoint (`POST /chat`) plus the session-index and
//! settings routes. Everything except `/health` sits behind Basic auth.

use std::convert::Infallible;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures::stream;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use agenthub_agent::{CliAgent, QueryOptions};
use agenthub_protocol::{
    LoadSessionsRequest, LoadSessionsResponse, SessionDetail, SessionSummary, StopRequest,
    StreamEvent, SystemPrompt, TurnRequest, UserSettings, UserSettingsUpdate,
};

use crate::auth::{self, AuthUser};
use crate::bootstrap;
use crate::config::Config;
use crate::error::ApiError;
use crate::resolver;
use crate::runs::RunRegistry;
use crate::store::SessionStore;
use crate::transcript;
use crate::translator::{self, TurnContext};

pub struct AppState {
    pub config: Config,
    pub store: SessionStore,
    pub runs: RunRegistry,
    pub agent: CliAgent,
}

pub fn router(state: Arc<AppState>) -> Router {
    let users = Arc::new(state.config.users.clone());

    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/sessions/load", post(load_sessions))
        .route("/sessions/{session_id}", get(get_session))
        .route(
            "/users/{user_id}/settings",
            get(get_user_settings).put(put_user_settings),
        )
        .route("/chat", post(chat))
        .route("/chat/stop", post(chat_stop))
        .layer(middleware::from_fn_with_state(users, auth::auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    "OK"
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let rows = state.store.list_conversations().await?;
    let projects_dir = state.config.projects_dir();

    let summaries = tokio::task::spawn_blocking(move || {
        rows.into_iter()
            .map(|row| SessionSummary {
                message_count: transcript::count_messages(
                    &projects_dir,
                    &row.cwd,
                    &row.session_id,
                ),
                session_id: row.session_id,
                title: row.title,
                cwd: row.cwd,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| ApiError::Internal(format!("summary task failed: {e}")))?;

    Ok(Json(summaries))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let record = state
        .store
        .get_conversation(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("session not found".to_string()))?;

    let projects_dir = state.config.projects_dir();
    let cwd = record.cwd.clone();
    let id = record.session_id.clone();
    let messages =
        tokio::task::spawn_blocking(move || transcript::read_records(&projects_dir, &cwd, &id))
            .await
            .map_err(|e| ApiError::Internal(format!("transcript task failed: {e}")))?;

    Ok(Json(SessionDetail {
        session_id: record.session_id,
        title: record.title,
        cwd: record.cwd,
        created_at: record.created_at,
        updated_at: record.updated_at,
        messages,
    }))
}

async fn load_sessions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoadSessionsRequest>,
) -> Result<Json<LoadSessionsResponse>, ApiError> {
    let root = body
        .claude_dir
        .as_deref()
        .map(expand_user)
        .unwrap_or_else(|| state.config.claude_root.clone());

    let stats = bootstrap::bootstrap(&state.store, &root).await?;

    Ok(Json(LoadSessionsResponse {
        claude_dir: root.display().to_string(),
        sessions_loaded: stats.sessions,
        agent_runs_loaded: stats.agent_runs,
    }))
}

async fn get_user_settings(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(current_user)): Extension<AuthUser>,
    Path(user_id): Path<String>,
) -> Result<Json<UserSettings>, ApiError> {
    if current_user != user_id {
        return Err(ApiError::Forbidden("forbidden".to_string()));
    }
    let settings = state
        .store
        .get_user_settings(&user_id)
        .await?
        .unwrap_or_else(|| UserSettings::defaults_for(&user_id));
    Ok(Json(settings))
}

async fn put_user_settings(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(current_user)): Extension<AuthUser>,
    Path(user_id): Path<String>,
    Json(body): Json<UserSettingsUpdate>,
) -> Result<Json<UserSettings>, ApiError> {
    if current_user != user_id {
        return Err(ApiError::Forbidden("forbidden".to_string()));
    }
    let settings = UserSettings {
        user_id,
        permission_mode: body.permission_mode,
        system_prompt: body.system_prompt,
    };
    state.store.upsert_user_settings(&settings).await?;
    Ok(Json(settings))
}

/// The streaming chat endpoint. Validation failures reject the whole turn
/// before any event is emitted; afterwards the translator owns all faults.
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TurnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resolved = resolver::resolve_turn(&state.store, &request).await?;
    let run_id = agenthub_protocol::new_id();

    let options = QueryOptions {
        resume: resolved.session_id.clone(),
        permission_mode: Some(request.permission_mode.as_str().to_string()),
        system_prompt: request
            .system_prompt
            .as_ref()
            .and_then(SystemPrompt::as_text)
            .map(str::to_string),
        include_partial_messages: true,
    };

    let agent = state.agent.clone();
    let prompt = request.message.clone();
    let cwd = PathBuf::from(&resolved.cwd);
    let query = async move { agent.query(&prompt, &cwd, &options).await };

    let ctx = TurnContext {
        resolved,
        message: request.message,
        run_id: run_id.clone(),
    };
    let events = translator::spawn_turn(state.store.clone(), state.runs.clone(), ctx, query);

    let stream = stream::unfold(events, |mut events| async move {
        events
            .recv()
            .await
            .map(|event| (Ok::<_, Infallible>(sse_event(event)), events))
    });

    Ok((
        [("x-run-id", run_id)],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    ))
}

async fn chat_stop(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StopRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.runs.stop(&body.run_id) {
        return Err(ApiError::NotFound("run not found".to_string()));
    }
    Ok((
        StatusCode::OK,
        Json(json!({"run_id": body.run_id, "stopping": true})),
    ))
}

fn sse_event(event: StreamEvent) -> Event {
    let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.kind()).data(data)
}

/// Minimal `~` expansion for the optional bootstrap root override.
fn expand_user(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    FsPath::new(raw).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_event_uses_the_event_kind() {
        let event = StreamEvent::Error {
            message: "boom".to_string(),
        };
        // Event has no public accessors; the kind/data layout is covered by
        // StreamEvent::sse_frame tests. Here we only check it builds.
        let _ = sse_event(event);
    }

    #[test]
    fn expand_user_leaves_absolute_paths_alone() {
        assert_eq!(expand_user("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
