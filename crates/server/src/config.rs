//! Process configuration
//!
//! Built once in `main` from CLI arguments with env fallbacks, then passed
//! by reference into each component constructor. No ambient globals.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "agenthub", about = "Streaming chat backend for the Claude agent CLI")]
pub struct Args {
    /// Transcript root (the directory containing projects/)
    #[arg(long, env = "AGENTHUB_CLAUDE_DIR")]
    pub claude_dir: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, env = "AGENTHUB_DB", default_value = "agenthub.db")]
    pub db: PathBuf,

    /// Bind address
    #[arg(long, env = "AGENTHUB_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// Basic-auth credential as user:password. Repeatable.
    #[arg(long = "user", env = "AGENTHUB_USERS", value_delimiter = ',')]
    pub users: Vec<String>,

    /// Log directory; stdout-only logging when unset
    #[arg(long, env = "AGENTHUB_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub claude_root: PathBuf,
    pub db_path: PathBuf,
    pub bind: SocketAddr,
    pub users: HashMap<String, String>,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_args(args: Args) -> anyhow::Result<Self> {
        let claude_root = match args.claude_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("HOME directory not found")?
                .join(".claude"),
        };

        let mut users = HashMap::new();
        for entry in &args.users {
            let (user, password) = entry
                .split_once(':')
                .with_context(|| format!("invalid --user entry (want user:password): {entry}"))?;
            users.insert(user.to_string(), password.to_string());
        }

        Ok(Self {
            claude_root,
            db_path: args.db,
            bind: args.bind,
            users,
            log_dir: args.log_dir,
        })
    }

    /// The directory holding one subdirectory per project slug.
    pub fn projects_dir(&self) -> PathBuf {
        self.claude_root.join("projects")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(users: &[&str]) -> Args {
        Args {
            claude_dir: Some(PathBuf::from("/tmp/claude")),
            db: PathBuf::from("test.db"),
            bind: "127.0.0.1:0".parse().unwrap(),
            users: users.iter().map(|s| s.to_string()).collect(),
            log_dir: None,
        }
    }

    #[test]
    fn parses_credentials() {
        let config = Config::from_args(args(&["alice:secret", "bob:hunter2"])).unwrap();
        assert_eq!(config.users.get("alice").map(String::as_str), Some("secret"));
        assert_eq!(config.users.len(), 2);
        assert_eq!(config.projects_dir(), PathBuf::from("/tmp/claude/projects"));
    }

    #[test]
    fn rejects_malformed_credentials() {
        assert!(Config::from_args(args(&["no-colon"])).is_err());
    }
}
