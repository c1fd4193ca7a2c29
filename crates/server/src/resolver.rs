//! Turn admission
//!
//! Pure validation, no side effects: resolves the conversation identity and
//! the effective working directory for one turn, or rejects it before any
//! streaming begins.

use std::fs;
use std::path::{Path, PathBuf};

use agenthub_protocol::TurnRequest;

use crate::error::ApiError;
use crate::store::SessionStore;

/// The admitted shape of one turn.
#[derive(Debug, Clone)]
pub struct ResolvedTurn {
    /// Identity to resume; `None` until the agent reports one.
    pub session_id: Option<String>,
    /// Canonicalized effective working directory.
    pub cwd: String,
    pub is_new: bool,
    /// Title already on record for a resumed conversation.
    pub stored_title: Option<String>,
}

pub async fn resolve_turn(
    store: &SessionStore,
    request: &TurnRequest,
) -> Result<ResolvedTurn, ApiError> {
    match request.session_id.as_deref() {
        None => {
            let cwd = request.cwd.as_deref().ok_or_else(|| {
                ApiError::InvalidRequest("cwd is required when starting a new session".to_string())
            })?;
            if !Path::new(cwd).is_dir() {
                return Err(ApiError::InvalidRequest(format!(
                    "cwd does not exist or is not a directory: {cwd}"
                )));
            }
            let canonical = fs::canonicalize(cwd).map_err(|e| {
                ApiError::InvalidRequest(format!("cwd cannot be resolved: {cwd}: {e}"))
            })?;
            Ok(ResolvedTurn {
                session_id: None,
                cwd: canonical.to_string_lossy().into_owned(),
                is_new: true,
                stored_title: None,
            })
        }
        Some(session_id) => {
            let record = store
                .get_conversation(session_id)
                .await?
                .ok_or_else(|| ApiError::NotFound("session not found".to_string()))?;

            if let Some(cwd) = request.cwd.as_deref() {
                let requested = fs::canonicalize(cwd).ok();
                let stored = fs::canonicalize(&record.cwd)
                    .unwrap_or_else(|_| PathBuf::from(&record.cwd));
                if requested.as_deref() != Some(stored.as_path()) {
                    return Err(ApiError::InvalidRequest(
                        "cwd mismatch for existing session".to_string(),
                    ));
                }
            }

            Ok(ResolvedTurn {
                session_id: Some(record.session_id),
                cwd: record.cwd,
                is_new: false,
                stored_title: Some(record.title),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenthub_protocol::PermissionMode;
    use chrono::Utc;
    use tempfile::TempDir;

    fn request(session_id: Option<&str>, cwd: Option<&str>) -> TurnRequest {
        TurnRequest {
            session_id: session_id.map(str::to_string),
            cwd: cwd.map(str::to_string),
            message: "hello".to_string(),
            permission_mode: PermissionMode::Default,
            system_prompt: None,
        }
    }

    async fn store(dir: &TempDir) -> SessionStore {
        let store = SessionStore::new(dir.path().join("test.db"));
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn new_turn_requires_an_existing_directory() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let err = resolve_turn(&store, &request(None, None)).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));

        let err = resolve_turn(&store, &request(None, Some("/definitely/not/here")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn new_turn_canonicalizes_the_directory() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let project = dir.path().join("proj");
        std::fs::create_dir_all(project.join("sub")).unwrap();
        let dotted = project.join("sub").join("..");

        let resolved = resolve_turn(&store, &request(None, dotted.to_str()))
            .await
            .unwrap();
        assert!(resolved.is_new);
        assert_eq!(resolved.session_id, None);
        assert_eq!(
            PathBuf::from(&resolved.cwd),
            fs::canonicalize(&project).unwrap()
        );
    }

    #[tokio::test]
    async fn unknown_identity_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let err = resolve_turn(&store, &request(Some("missing"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn resume_rejects_a_mismatched_directory() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let stored_cwd = dir.path().join("proj");
        let elsewhere = dir.path().join("elsewhere");
        std::fs::create_dir_all(&stored_cwd).unwrap();
        std::fs::create_dir_all(&elsewhere).unwrap();

        store
            .upsert_conversation(
                "s1",
                "hello",
                &fs::canonicalize(&stored_cwd).unwrap().to_string_lossy(),
                Utc::now(),
                Utc::now(),
            )
            .await
            .unwrap();

        let err = resolve_turn(&store, &request(Some("s1"), elsewhere.to_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));

        // The stored directory itself is accepted, and is the effective one.
        let resolved = resolve_turn(&store, &request(Some("s1"), stored_cwd.to_str()))
            .await
            .unwrap();
        assert!(!resolved.is_new);
        assert_eq!(resolved.session_id.as_deref(), Some("s1"));
        assert_eq!(resolved.stored_title.as_deref(), Some("hello"));

        // Omitting the directory on resume is always fine.
        let resolved = resolve_turn(&store, &request(Some("s1"), None)).await.unwrap();
        assert!(!resolved.is_new);
    }
}
