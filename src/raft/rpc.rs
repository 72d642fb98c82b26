use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::raft::state::LogEntry;

/// AppendEntries RPC arguments (also used as heartbeat when `entries` is empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    /// Leader's term.
    pub term: u64,
    /// So followers can redirect clients.
    pub leader_id: String,
    /// Index of the log entry immediately preceding the new ones.
    pub prev_log_index: u64,
    /// Term of the `prev_log_index` entry.
    pub prev_log_term: u64,
    /// Entries to store; empty for heartbeat.
    pub entries: Vec<LogEntry>,
    /// Leader's commit index.
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    /// Receiver's current term, for the leader to update itself.
    pub term: u64,
    /// True if the follower accepted the entries.
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    /// Candidate's term.
    pub term: u64,
    /// Candidate requesting the vote.
    pub candidate_id: String,
    /// Index of the candidate's last log entry.
    pub last_log_index: u64,
    /// Term of the candidate's last log entry.
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub term: u64,
    pub leader_id: String,
    /// The snapshot replaces all entries up through and including this index.
    pub last_included_index: u64,
    pub last_included_term: u64,
    /// Byte offset of this chunk within the snapshot file.
    pub offset: u64,
    pub data: Vec<u8>,
    /// True if this is the last chunk.
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientResponse {
    pub success: bool,
    /// Address of the node believed to be the leader, when this node is not.
    pub leader_hint: Option<String>,
}

impl ClientResponse {
    pub fn accepted() -> Self {
        Self {
            success: true,
            leader_hint: None,
        }
    }

    pub fn redirect(leader_hint: Option<String>) -> Self {
        Self {
            success: false,
            leader_hint,
        }
    }
}

/// Remote-peer capability consumed by the consensus engine.
///
/// The engine only ever talks to peers through this trait; the concrete
/// transport (framing, retries, token handling) lives behind it.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn append_entries_invoke(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse>;

    async fn vote_invoke(&self, request: VoteRequest) -> Result<VoteResponse>;

    async fn install_snapshot_invoke(
        &self,
        request: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse>;

    async fn client_invoke(&self, request: ClientRequest) -> Result<ClientResponse>;
}
