//! Session metadata store - SQLite-backed conversation index
//!
//! Every call opens a short-lived connection inside `spawn_blocking` and
//! runs a single statement, so each insert-or-update is atomic with respect
//! to concurrent callers on the same identity. The merge rule (min created,
//! max updated, last-write-wins title/cwd, keep-existing parent link) makes
//! concurrent upserts order-independent.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use agenthub_protocol::{PermissionMode, SystemPrompt, UserSettings};

use crate::error::ApiError;

/// A stored primary conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRecord {
    pub session_id: String,
    pub title: String,
    pub cwd: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored sub-agent run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRunRecord {
    pub agent_id: String,
    pub parent_session_id: Option<String>,
    pub title: String,
    pub cwd: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    db_path: PathBuf,
}

/// Timestamps are stored as fixed-precision RFC3339 UTC strings, so the
/// merge SQL can compare them lexicographically.
fn ts_to_str(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn str_to_ts(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(err) => {
            warn!(
                component = "store",
                event = "store.timestamp_unparsed",
                raw = %raw,
                error = %err,
                "Stored timestamp did not parse; substituting now"
            );
            Utc::now()
        }
    }
}

fn open_connection(db_path: &PathBuf) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(conn)
}

impl SessionStore {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            f(conn)
        })
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))?;
        Ok(result?)
    }

    /// Create the schema. Call once at startup before any other operation.
    pub async fn init(&self) -> Result<(), ApiError> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ApiError::Internal(format!("cannot create db dir: {e}")))?;
            }
        }
        self.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    session_id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    cwd TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS agent_sessions (
                    agent_id TEXT PRIMARY KEY,
                    parent_session_id TEXT,
                    title TEXT NOT NULL,
                    cwd TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    FOREIGN KEY(parent_session_id) REFERENCES sessions(session_id)
                        ON DELETE SET NULL
                );
                CREATE TABLE IF NOT EXISTS user_settings (
                    user_id TEXT PRIMARY KEY,
                    permission_mode TEXT NOT NULL,
                    system_prompt TEXT
                );",
            )
        })
        .await
    }

    /// Insert-or-merge one conversation. Title and cwd are last-write-wins;
    /// created_at only ever moves earlier, updated_at only ever later.
    pub async fn upsert_conversation(
        &self,
        session_id: &str,
        title: &str,
        cwd: &str,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let session_id = session_id.to_string();
        let title = title.to_string();
        let cwd = cwd.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (session_id, title, cwd, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(session_id) DO UPDATE SET
                     title = excluded.title,
                     cwd = excluded.cwd,
                     created_at = CASE
                         WHEN excluded.created_at < sessions.created_at THEN excluded.created_at
                         ELSE sessions.created_at
                     END,
                     updated_at = CASE
                         WHEN excluded.updated_at > sessions.updated_at THEN excluded.updated_at
                         ELSE sessions.updated_at
                     END",
                params![
                    session_id,
                    title,
                    cwd,
                    ts_to_str(created_at),
                    ts_to_str(updated_at)
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Insert-or-merge one sub-agent run. Same timestamp merge as
    /// conversations; an established parent link is never overwritten.
    pub async fn upsert_agent_run(
        &self,
        agent_id: &str,
        parent_session_id: Option<&str>,
        title: &str,
        cwd: &str,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let agent_id = agent_id.to_string();
        let parent_session_id = parent_session_id.map(str::to_string);
        let title = title.to_string();
        let cwd = cwd.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO agent_sessions
                     (agent_id, parent_session_id, title, cwd, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(agent_id) DO UPDATE SET
                     parent_session_id =
                         COALESCE(agent_sessions.parent_session_id, excluded.parent_session_id),
                     title = excluded.title,
                     cwd = excluded.cwd,
                     created_at = CASE
                         WHEN excluded.created_at < agent_sessions.created_at
                             THEN excluded.created_at
                         ELSE agent_sessions.created_at
                     END,
                     updated_at = CASE
                         WHEN excluded.updated_at > agent_sessions.updated_at
                             THEN excluded.updated_at
                         ELSE agent_sessions.updated_at
                     END",
                params![
                    agent_id,
                    parent_session_id,
                    title,
                    cwd,
                    ts_to_str(created_at),
                    ts_to_str(updated_at)
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_conversation(
        &self,
        session_id: &str,
    ) -> Result<Option<ConversationRecord>, ApiError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT session_id, title, cwd, created_at, updated_at
                 FROM sessions WHERE session_id = ?1",
                params![session_id],
                row_to_conversation,
            )
            .optional()
        })
        .await
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationRecord>, ApiError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, title, cwd, created_at, updated_at
                 FROM sessions ORDER BY updated_at DESC",
            )?;
            let rows = stmt
                .query_map([], row_to_conversation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn get_agent_run(&self, agent_id: &str) -> Result<Option<AgentRunRecord>, ApiError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT agent_id, parent_session_id, title, cwd, created_at, updated_at
                 FROM agent_sessions WHERE agent_id = ?1",
                params![agent_id],
                |row| {
                    Ok(AgentRunRecord {
                        agent_id: row.get(0)?,
                        parent_session_id: row.get(1)?,
                        title: row.get(2)?,
                        cwd: row.get(3)?,
                        created_at: str_to_ts(&row.get::<_, String>(4)?),
                        updated_at: str_to_ts(&row.get::<_, String>(5)?),
                    })
                },
            )
            .optional()
        })
        .await
    }

    /// The set of known primary conversation identities. Used by the
    /// bootstrapper to resolve sub-agent parent links.
    pub async fn conversation_ids(&self) -> Result<HashSet<String>, ApiError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT session_id FROM sessions")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<HashSet<_>>>()?;
            Ok(ids)
        })
        .await
    }

    pub async fn get_user_settings(
        &self,
        user_id: &str,
    ) -> Result<Option<UserSettings>, ApiError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT user_id, permission_mode, system_prompt
                 FROM user_settings WHERE user_id = ?1",
                params![user_id],
                |row| {
                    let mode: String = row.get(1)?;
                    let prompt: Option<String> = row.get(2)?;
                    Ok(UserSettings {
                        user_id: row.get(0)?,
                        permission_mode: PermissionMode::parse(&mode).unwrap_or_default(),
                        system_prompt: prompt.as_deref().map(deserialize_system_prompt),
                    })
                },
            )
            .optional()
        })
        .await
    }

    /// Last write wins; no merge.
    pub async fn upsert_user_settings(&self, settings: &UserSettings) -> Result<(), ApiError> {
        let user_id = settings.user_id.clone();
        let mode = settings.permission_mode.as_str();
        let prompt = settings
            .system_prompt
            .as_ref()
            .map(|p| serde_json::to_string(p).unwrap_or_else(|_| String::new()));
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO user_settings (user_id, permission_mode, system_prompt)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     permission_mode = excluded.permission_mode,
                     system_prompt = excluded.system_prompt",
                params![user_id, mode, prompt],
            )?;
            Ok(())
        })
        .await
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRecord> {
    Ok(ConversationRecord {
        session_id: row.get(0)?,
        title: row.get(1)?,
        cwd: row.get(2)?,
        created_at: str_to_ts(&row.get::<_, String>(3)?),
        updated_at: str_to_ts(&row.get::<_, String>(4)?),
    })
}

/// Stored prompts are JSON when written by us; anything unparseable is
/// treated as legacy plain text.
fn deserialize_system_prompt(raw: &str) -> SystemPrompt {
    serde_json::from_str(raw).unwrap_or_else(|_| SystemPrompt::Text(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    async fn store(dir: &TempDir) -> SessionStore {
        let store = SessionStore::new(dir.path().join("test.db"));
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn merge_keeps_time_bounds_in_either_order() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        store
            .upsert_conversation("s1", "first", "/tmp/a", ts(10), ts(20))
            .await
            .unwrap();
        store
            .upsert_conversation("s1", "second", "/tmp/b", ts(0), ts(30))
            .await
            .unwrap();

        let record = store.get_conversation("s1").await.unwrap().unwrap();
        assert_eq!(record.title, "second");
        assert_eq!(record.cwd, "/tmp/b");
        assert_eq!(record.created_at, ts(0));
        assert_eq!(record.updated_at, ts(30));

        // Opposite arrival order converges on the same bounds.
        store
            .upsert_conversation("s2", "second", "/tmp/b", ts(0), ts(30))
            .await
            .unwrap();
        store
            .upsert_conversation("s2", "first", "/tmp/a", ts(10), ts(20))
            .await
            .unwrap();

        let record = store.get_conversation("s2").await.unwrap().unwrap();
        assert_eq!(record.created_at, ts(0));
        assert_eq!(record.updated_at, ts(30));
    }

    #[tokio::test]
    async fn established_parent_link_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        store
            .upsert_conversation("p1", "parent", "/tmp/a", ts(0), ts(0))
            .await
            .unwrap();
        store
            .upsert_conversation("p2", "parent", "/tmp/a", ts(0), ts(0))
            .await
            .unwrap();

        store
            .upsert_agent_run("a1", None, "run", "/tmp/a", ts(1), ts(1))
            .await
            .unwrap();
        let run = store.get_agent_run("a1").await.unwrap().unwrap();
        assert_eq!(run.parent_session_id, None);

        // Absent link picks up an incoming value.
        store
            .upsert_agent_run("a1", Some("p1"), "run", "/tmp/a", ts(2), ts(2))
            .await
            .unwrap();
        let run = store.get_agent_run("a1").await.unwrap().unwrap();
        assert_eq!(run.parent_session_id.as_deref(), Some("p1"));

        // An established link survives both a different and an absent value.
        store
            .upsert_agent_run("a1", Some("p2"), "run", "/tmp/a", ts(3), ts(3))
            .await
            .unwrap();
        store
            .upsert_agent_run("a1", None, "run", "/tmp/a", ts(4), ts(4))
            .await
            .unwrap();
        let run = store.get_agent_run("a1").await.unwrap().unwrap();
        assert_eq!(run.parent_session_id.as_deref(), Some("p1"));
        assert_eq!(run.created_at, ts(1));
        assert_eq!(run.updated_at, ts(4));
    }

    #[tokio::test]
    async fn list_orders_by_updated_desc() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        store
            .upsert_conversation("old", "old", "/tmp/a", ts(0), ts(10))
            .await
            .unwrap();
        store
            .upsert_conversation("new", "new", "/tmp/a", ts(0), ts(50))
            .await
            .unwrap();

        let rows = store.list_conversations().await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(ids, ["new", "old"]);
    }

    #[tokio::test]
    async fn user_settings_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        assert!(store.get_user_settings("alice").await.unwrap().is_none());

        let first = UserSettings {
            user_id: "alice".to_string(),
            permission_mode: PermissionMode::Plan,
            system_prompt: Some(SystemPrompt::Text("be brief".to_string())),
        };
        store.upsert_user_settings(&first).await.unwrap();

        let second = UserSettings {
            user_id: "alice".to_string(),
            permission_mode: PermissionMode::BypassPermissions,
            system_prompt: None,
        };
        store.upsert_user_settings(&second).await.unwrap();

        let stored = store.get_user_settings("alice").await.unwrap().unwrap();
        assert_eq!(stored, second);
    }
}
