//! Transcript bootstrapper
//!
//! Rebuilds the session index from on-disk transcripts: primaries are
//! persisted first so their identities become resolvable, then sub-agent
//! runs with parent links checked against the known primary set. Running
//! it any number of times is idempotent — identity is the uniqueness key
//! and the store merge never regresses timestamps.

use std::path::Path;

use tracing::info;

use crate::error::ApiError;
use crate::store::SessionStore;
use crate::transcript;

/// Counts of records processed by one bootstrap run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapStats {
    pub sessions: usize,
    pub agent_runs: usize,
}

/// Scan `root` and feed every discovered transcript into the store.
///
/// A missing root is the only fatal condition; everything else degrades by
/// skipping the file or line concerned.
pub async fn bootstrap(store: &SessionStore, root: &Path) -> Result<BootstrapStats, ApiError> {
    if !root.exists() {
        return Err(ApiError::NotFound(format!(
            "transcript root does not exist: {}",
            root.display()
        )));
    }

    let root_owned = root.to_path_buf();
    let metas = tokio::task::spawn_blocking(move || transcript::scan_root(&root_owned))
        .await
        .map_err(|e| ApiError::Internal(format!("scan task failed: {e}")))?;

    let (agent_runs, primaries): (Vec<_>, Vec<_>) =
        metas.into_iter().partition(|meta| meta.is_agent_run);

    // Identities already on record count as known parents too.
    let mut known_ids = store.conversation_ids().await?;
    let mut stats = BootstrapStats::default();

    for meta in primaries {
        store
            .upsert_conversation(
                &meta.session_id,
                &meta.title,
                &meta.cwd,
                meta.created_at,
                meta.updated_at,
            )
            .await?;
        known_ids.insert(meta.session_id);
        stats.sessions += 1;
    }

    for meta in agent_runs {
        let parent = meta
            .parent_session_id
            .as_deref()
            .filter(|parent| known_ids.contains(*parent));
        store
            .upsert_agent_run(
                &meta.session_id,
                parent,
                &meta.title,
                &meta.cwd,
                meta.created_at,
                meta.updated_at,
            )
            .await?;
        stats.agent_runs += 1;
    }

    info!(
        component = "bootstrap",
        event = "bootstrap.complete",
        root = %root.display(),
        sessions = stats.sessions,
        agent_runs = stats.agent_runs,
        "Session index bootstrapped from transcripts"
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_transcript(projects: &Path, slug: &str, name: &str, lines: &[&str]) {
        let dir = projects.join(slug);
        fs::create_dir_all(&dir).unwrap();
        let mut file = fs::File::create(dir.join(name)).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    async fn store(dir: &TempDir) -> SessionStore {
        let store = SessionStore::new(dir.path().join("test.db"));
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn missing_root_is_the_only_fatal_condition() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let err = bootstrap(&store, &dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn double_bootstrap_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let root = dir.path().join("claude");
        let projects = root.join("projects");
        write_transcript(
            &projects,
            "-tmp-a",
            "s1.jsonl",
            &[
                r#"{"cwd": "/tmp/a", "timestamp": "2024-03-01T10:00:00Z"}"#,
                r#"{"type": "user", "message": {"content": "hello"}, "timestamp": "2024-03-01T10:01:00Z"}"#,
            ],
        );
        write_transcript(
            &projects,
            "-tmp-a",
            "agent-r1.jsonl",
            &[r#"{"cwd": "/tmp/a", "parent_session_id": "s1"}"#],
        );

        let first = bootstrap(&store, &root).await.unwrap();
        let second = bootstrap(&store, &root).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.sessions, 1);
        assert_eq!(first.agent_runs, 1);

        // Identity is the uniqueness key: still exactly one conversation.
        assert_eq!(store.list_conversations().await.unwrap().len(), 1);
        let run = store.get_agent_run("agent-r1").await.unwrap().unwrap();
        assert_eq!(run.parent_session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn dangling_parent_is_stored_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let root = dir.path().join("claude");
        write_transcript(
            &root.join("projects"),
            "-tmp-a",
            "agent-orphan.jsonl",
            &[r#"{"cwd": "/tmp/a", "parent_session_id": "never-seen"}"#],
        );

        let stats = bootstrap(&store, &root).await.unwrap();
        assert_eq!(stats.agent_runs, 1);

        let run = store.get_agent_run("agent-orphan").await.unwrap().unwrap();
        assert_eq!(run.parent_session_id, None);
    }

    #[tokio::test]
    async fn parents_already_on_record_are_known() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let root = dir.path().join("claude");
        store
            .upsert_conversation(
                "pre-existing",
                "earlier turn",
                "/tmp/a",
                chrono::Utc::now(),
                chrono::Utc::now(),
            )
            .await
            .unwrap();
        write_transcript(
            &root.join("projects"),
            "-tmp-a",
            "agent-r2.jsonl",
            &[r#"{"cwd": "/tmp/a", "parent_session_id": "pre-existing"}"#],
        );

        bootstrap(&store, &root).await.unwrap();
        let run = store.get_agent_run("agent-r2").await.unwrap().unwrap();
        assert_eq!(run.parent_session_id.as_deref(), Some("pre-existing"));
    }
}
