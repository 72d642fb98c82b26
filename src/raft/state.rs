use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{RaftError, Result};
use crate::machine::StateMachine;

/// A single entry in the replicated log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub command: String,
}

/// State that must survive restarts on all servers.
///
/// # Safety invariants
///
/// - `current_term` only ever increases, and `voted_for` is cleared whenever
///   it does: a node casts at most one vote per term.
/// - `logs` is kept in index order; entries are immutable once appended
///   except for truncation of a conflicting suffix during replication.
/// - Entry lookup goes through the `index` field rather than the vector
///   position, since replication can leave gaps in the index sequence.
#[derive(Debug, Default)]
pub struct PersistentState {
    /// Latest term this server has seen (0 on first boot).
    pub current_term: u64,
    /// Candidate that received this server's vote in the current term.
    pub voted_for: Option<String>,
    /// Log entries, first index is 1.
    pub logs: Vec<LogEntry>,
}

impl PersistentState {
    pub fn last_log_index(&self) -> u64 {
        self.logs.last().map(|e| e.index).unwrap_or(0)
    }

    pub fn last_log_term(&self) -> u64 {
        self.logs.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn entry(&self, index: u64) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.logs.iter().find(|e| e.index == index)
    }

    /// Drop every entry at `index` and after.
    pub fn truncate_from(&mut self, index: u64) {
        self.logs.retain(|e| e.index < index);
    }

    /// Whether a candidate with this last-log metadata is at least as
    /// up-to-date as we are: later term wins, equal terms compare by index.
    pub fn is_up_to_date(&self, last_log_term: u64, last_log_index: u64) -> bool {
        last_log_term > self.last_log_term()
            || (last_log_term == self.last_log_term() && last_log_index >= self.last_log_index())
    }
}

/// Volatile state on all servers.
#[derive(Debug, Default)]
pub struct VolatileState {
    /// Highest log index known to be committed.
    pub commit_index: u64,
    /// Highest log index applied to the state machine.
    pub last_applied: u64,
}

/// Per-peer replication state, held only while this node is leader and
/// rebuilt on every promotion.
#[derive(Debug, Clone)]
pub struct LeaderVolatileState {
    /// Index of the next log entry to send to that peer.
    pub next_index: u64,
    /// Highest log index known to be replicated on that peer.
    pub match_index: u64,
}

/// Owns the node's persistent and volatile state behind one reader-writer
/// lock each, and drives applies into the external state machine as the
/// commit index advances. Role implementations never touch the raw state;
/// every mutation goes through here so the term/vote and apply-order
/// invariants hold regardless of which timer or RPC task is calling.
pub struct StateController {
    persistent: RwLock<PersistentState>,
    volatile: RwLock<VolatileState>,
    machine: Arc<dyn StateMachine>,
}

impl StateController {
    pub fn new(machine: Arc<dyn StateMachine>) -> Self {
        Self {
            persistent: RwLock::new(PersistentState::default()),
            volatile: RwLock::new(VolatileState::default()),
            machine,
        }
    }

    pub async fn current_term(&self) -> u64 {
        self.persistent.read().await.current_term
    }

    pub async fn voted_for(&self) -> Option<String> {
        self.persistent.read().await.voted_for.clone()
    }

    pub async fn last_log_index(&self) -> u64 {
        self.persistent.read().await.last_log_index()
    }

    pub async fn last_log_term(&self) -> u64 {
        self.persistent.read().await.last_log_term()
    }

    pub async fn log_len(&self) -> usize {
        self.persistent.read().await.logs.len()
    }

    pub async fn entry(&self, index: u64) -> Option<LogEntry> {
        self.persistent.read().await.entry(index).cloned()
    }

    pub async fn has_entry(&self, index: u64, term: u64) -> bool {
        self.persistent
            .read()
            .await
            .entry(index)
            .is_some_and(|e| e.term == term)
    }

    pub async fn is_up_to_date(&self, last_log_term: u64, last_log_index: u64) -> bool {
        self.persistent
            .read()
            .await
            .is_up_to_date(last_log_term, last_log_index)
    }

    pub async fn commit_index(&self) -> u64 {
        self.volatile.read().await.commit_index
    }

    pub async fn last_applied(&self) -> u64 {
        self.volatile.read().await.last_applied
    }

    /// Set the current term and clear the recorded vote. Called whenever a
    /// higher term is observed or a candidate begins a new election.
    pub async fn update_term(&self, term: u64) {
        let mut state = self.persistent.write().await;
        tracing::debug!(term, "updating current term");
        state.current_term = term;
        state.voted_for = None;
    }

    pub async fn update_vote_for(&self, candidate_id: &str) {
        let mut state = self.persistent.write().await;
        state.voted_for = Some(candidate_id.to_string());
    }

    /// Append already-indexed entries to the durable log (leader commit path).
    pub async fn append_log_entries(&self, entries: Vec<LogEntry>) {
        let mut state = self.persistent.write().await;
        state.logs.extend(entries);
    }

    /// Merge replicated entries into the local log (follower path): an entry
    /// whose index collides with a local entry of a different term truncates
    /// the log from that index onward before being appended; a same-term
    /// duplicate is skipped; an unseen index is appended.
    pub async fn merge_entries(&self, entries: Vec<LogEntry>) {
        let mut state = self.persistent.write().await;
        for entry in entries {
            match state.entry(entry.index).map(|e| e.term) {
                Some(local_term) if local_term != entry.term => {
                    tracing::debug!(
                        index = entry.index,
                        local_term,
                        incoming_term = entry.term,
                        "truncating conflicting suffix"
                    );
                    state.truncate_from(entry.index);
                    state.logs.push(entry);
                }
                Some(_) => {}
                None => state.logs.push(entry),
            }
        }
    }

    /// Leader-side optimistic advance after a majority ack: bump the commit
    /// index by one and apply newly committed entries in order.
    pub async fn increase_commit_index(&self) -> Result<()> {
        let mut volatile = self.volatile.write().await;
        volatile.commit_index += 1;
        self.apply_committed(&mut volatile).await
    }

    /// Advance the commit index to `commit_index` and apply every newly
    /// committed entry, in index order, one at a time. A target at or below
    /// the current commit index is ignored: the commit index never regresses.
    pub async fn update_commit_index(&self, commit_index: u64) -> Result<()> {
        let mut volatile = self.volatile.write().await;
        if commit_index <= volatile.commit_index {
            return Ok(());
        }
        volatile.commit_index = commit_index;
        self.apply_committed(&mut volatile).await
    }

    async fn apply_committed(&self, volatile: &mut VolatileState) -> Result<()> {
        while volatile.last_applied < volatile.commit_index {
            let next = volatile.last_applied + 1;
            let entry = self.persistent.read().await.entry(next).cloned();
            let Some(entry) = entry else {
                return Err(RaftError::MissingLogEntry(next));
            };
            self.machine.apply_log(&entry).await?;
            volatile.last_applied = next;
            tracing::debug!(index = next, "applied log entry to state machine");
        }
        Ok(())
    }
}
