use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{RaftError, Result};
use crate::raft::state::LogEntry;

/// Apply target for committed log entries.
///
/// `StateController` invokes this in strict index order as the commit index
/// advances; an error stops the apply loop with `last_applied` pointing at
/// the last successfully applied entry.
#[async_trait]
pub trait StateMachine: Send + Sync {
    async fn apply_log(&self, entry: &LogEntry) -> Result<()>;
}

/// File-backed state machine: the applied commands are kept as a JSON array
/// in a single file named after the node id (with path-hostile characters
/// stripped), rewritten on every apply.
pub struct FileStateMachine {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStateMachine {
    pub fn new(node_id: &str) -> Self {
        let name: String = node_id.chars().filter(|c| *c != '/' && *c != ':').collect();
        Self::with_path(format!("{name}.state"))
    }

    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateMachine for FileStateMachine {
    async fn apply_log(&self, entry: &LogEntry) -> Result<()> {
        let _guard = self.lock.lock().await;
        tracing::debug!(index = entry.index, term = entry.term, "applying log entry");

        let current = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(RaftError::Apply(e.to_string())),
        };
        let mut commands: Vec<String> = if current.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&current).map_err(|e| RaftError::Apply(e.to_string()))?
        };
        commands.push(entry.command.clone());

        let next =
            serde_json::to_string(&commands).map_err(|e| RaftError::Apply(e.to_string()))?;
        tokio::fs::write(&self.path, next)
            .await
            .map_err(|e| RaftError::Apply(e.to_string()))?;
        Ok(())
    }
}

/// Records applied entries in memory. Used in tests and wherever no durable
/// apply target is wanted.
#[derive(Default)]
pub struct InMemoryStateMachine {
    applied: std::sync::Mutex<Vec<LogEntry>>,
}

impl InMemoryStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Vec<LogEntry> {
        self.applied.lock().expect("applied lock poisoned").clone()
    }
}

#[async_trait]
impl StateMachine for InMemoryStateMachine {
    async fn apply_log(&self, entry: &LogEntry) -> Result<()> {
        self.applied
            .lock()
            .expect("applied lock poisoned")
            .push(entry.clone());
        Ok(())
    }
}
