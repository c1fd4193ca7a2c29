//! Transcript discovery and parsing
//!
//! Transcripts are append-only JSONL files owned by the agent runtime,
//! laid out as `<root>/projects/<project-slug>/<session_id>.jsonl`, with
//! sub-agent runs carrying an `agent-` filename prefix. This module only
//! reads them; it never writes or deletes. Every failure is contained at
//! the smallest unit that can fail: a malformed line or unreadable file is
//! skipped, never fatal.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::naming;

/// Filename prefix marking a sub-agent run transcript.
pub const AGENT_FILE_PREFIX: &str = "agent-";

/// Map a canonical working directory to its stable project directory name.
/// Every non-alphanumeric byte becomes `-`, so the mapping never depends on
/// platform path syntax.
pub fn project_slug(cwd: &str) -> String {
    cwd.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Path of one conversation's transcript under the projects directory.
pub fn transcript_path(projects_dir: &Path, cwd: &str, session_id: &str) -> PathBuf {
    projects_dir
        .join(project_slug(cwd))
        .join(format!("{session_id}.jsonl"))
}

/// Parse one transcript into its ordered records. Malformed lines are
/// skipped; a missing file yields an empty list.
pub fn read_records(projects_dir: &Path, cwd: &str, session_id: &str) -> Vec<Value> {
    let path = transcript_path(projects_dir, cwd, session_id);
    let Ok(file) = fs::File::open(&path) else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(record) => records.push(record),
            Err(_) => continue,
        }
    }
    records
}

/// Count non-empty lines without a full parse.
pub fn count_messages(projects_dir: &Path, cwd: &str, session_id: &str) -> usize {
    let path = transcript_path(projects_dir, cwd, session_id);
    let Ok(file) = fs::File::open(&path) else {
        return 0;
    };
    BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter(|line| !line.trim().is_empty())
        .count()
}

/// Summary metadata extracted from one transcript file.
#[derive(Debug, Clone)]
pub struct TranscriptMeta {
    pub session_id: String,
    pub title: String,
    pub cwd: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub parent_session_id: Option<String>,
    pub is_agent_run: bool,
}

fn is_agent_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(AGENT_FILE_PREFIX) && name.ends_with(".jsonl"))
}

/// Enumerate every transcript under `<root>/projects` and extract summary
/// metadata from each. Files that cannot be indexed are skipped.
pub fn scan_root(root: &Path) -> Vec<TranscriptMeta> {
    let projects_dir = root.join("projects");
    let Ok(projects) = fs::read_dir(&projects_dir) else {
        return Vec::new();
    };

    let mut metas = Vec::new();
    for project in projects.flatten() {
        let project_path = project.path();
        if !project_path.is_dir() {
            continue;
        }
        let Ok(files) = fs::read_dir(&project_path) else {
            continue;
        };
        for file in files.flatten() {
            let path = file.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
                continue;
            }
            match extract_metadata(&path) {
                Some(meta) => metas.push(meta),
                None => {
                    debug!(
                        component = "transcript",
                        event = "transcript.skipped",
                        path = %path.display(),
                        "Transcript not indexable"
                    );
                }
            }
        }
    }
    metas
}

/// Extract summary metadata from one transcript file.
///
/// Identity falls back to the file stem; the working directory comes from
/// the first record that declares one (a file with none cannot be indexed);
/// timestamp bounds ignore missing or unparseable values; the title comes
/// from the first user-authored message, falling back to the identity.
pub fn extract_metadata(path: &Path) -> Option<TranscriptMeta> {
    let file = fs::File::open(path).ok()?;

    let mut session_id: Option<String> = None;
    let mut cwd: Option<String> = None;
    let mut parent_session_id: Option<String> = None;
    let mut title: Option<String> = None;
    let mut earliest: Option<DateTime<Utc>> = None;
    let mut latest: Option<DateTime<Utc>> = None;

    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            continue;
        };

        if session_id.is_none() {
            session_id = first_string(&record, &["session_id", "sessionId"]);
        }
        if cwd.is_none() {
            cwd = first_string(&record, &["cwd", "project_path"]);
        }
        if parent_session_id.is_none() {
            parent_session_id = first_string(&record, &["parent_session_id", "parentSessionId"]);
        }
        if title.is_none() {
            title = record
                .get("title")
                .and_then(|t| t.as_str())
                .map(str::to_string)
                .or_else(|| user_message_text(&record));
        }
        if let Some(ts) = record
            .get("timestamp")
            .and_then(|t| t.as_str())
            .and_then(parse_timestamp)
        {
            earliest = Some(earliest.map_or(ts, |current| current.min(ts)));
            latest = Some(latest.map_or(ts, |current| current.max(ts)));
        }
    }

    let cwd = cwd?;
    let session_id = session_id.unwrap_or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    if session_id.is_empty() {
        return None;
    }

    let now = Utc::now();
    let title = title
        .map(|t| naming::truncate_title(t.trim()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| session_id.clone());

    Some(TranscriptMeta {
        title,
        cwd,
        created_at: earliest.unwrap_or(now),
        updated_at: latest.unwrap_or(now),
        parent_session_id,
        is_agent_run: is_agent_file(path),
        session_id,
    })
}

fn first_string(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        record
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Rendered text of a user-authored record: string content, or the joined
/// `text` blocks of structured content.
fn user_message_text(record: &Value) -> Option<String> {
    if record.get("type").and_then(|t| t.as_str()) != Some("user") {
        return None;
    }
    let message = record.get("message")?;
    if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
        return Some(text.to_string());
    }
    if let Some(blocks) = message.get("content").and_then(|c| c.as_array()) {
        let texts: Vec<&str> = blocks
            .iter()
            .filter_map(|block| {
                if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                    block.get("text").and_then(|t| t.as_str())
                } else {
                    None
                }
            })
            .collect();
        if !texts.is_empty() {
            return Some(texts.join("\n"));
        }
    }
    message
        .get("text")
        .and_then(|t| t.as_str())
        .map(str::to_string)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
