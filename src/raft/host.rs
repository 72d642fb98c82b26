use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{RaftError, Result};
use crate::raft::node::NodeInner;
use crate::raft::role::{Role, RoleKind};
use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, ClientRequest, ClientResponse,
    InstallSnapshotRequest, InstallSnapshotResponse, VoteRequest, VoteResponse,
};

/// Inbound RPC boundary. Every invoke runs the term safety gate and then
/// dispatches against the node's current role; a coarse lock serializes all
/// inbound handling so no two RPCs execute concurrently against the role.
pub struct Host {
    node: Arc<NodeInner>,
    lock: Mutex<()>,
}

impl Host {
    pub(crate) fn new(node: Arc<NodeInner>) -> Self {
        Self {
            node,
            lock: Mutex::new(()),
        }
    }

    /// Route a client command. Leaders accept it; a follower that knows its
    /// leader forwards the request and relays the answer; otherwise the
    /// caller gets a `NotLeader` error carrying the best leader hint.
    pub async fn client_invoke(&self, request: ClientRequest) -> Result<ClientResponse> {
        let _guard = self.lock.lock().await;

        let leader_hint = {
            let role = self.node.role.lock().await;
            match &*role {
                Role::Leader(leader) => return Ok(leader.command(&request).await),
                Role::Follower(follower) => follower.leader_id().map(str::to_owned),
                Role::Candidate(_) => None,
            }
        };

        if let Some(leader_id) = &leader_hint {
            if let Some(peer) = self.node.peers.iter().find(|p| p.address == *leader_id) {
                tracing::debug!(leader = %leader_id, "forwarding client command to leader");
                return peer.client.client_invoke(request).await;
            }
        }
        Err(RaftError::NotLeader(leader_hint))
    }

    pub async fn append_entries_invoke(
        &self,
        request: AppendEntriesRequest,
    ) -> AppendEntriesResponse {
        let _guard = self.lock.lock().await;
        tracing::debug!(
            leader = %request.leader_id,
            term = request.term,
            "append entries from leader"
        );
        NodeInner::ensure_exist_greater_term_and_change_role(&self.node, request.term).await;

        let current_term = self.node.state.current_term().await;
        if request.term < current_term {
            return AppendEntriesResponse {
                term: current_term,
                success: false,
            };
        }

        // A legal leader exists for our term; a candidate stands down.
        let step_down = {
            let role = self.node.role.lock().await;
            role.kind() == RoleKind::Candidate && request.term == current_term
        };
        if step_down {
            NodeInner::change_role(&self.node, RoleKind::Follower).await;
        }

        let mut role = self.node.role.lock().await;
        match &mut *role {
            Role::Follower(follower) => follower.append_entries(request).await,
            _ => AppendEntriesResponse {
                term: current_term,
                success: false,
            },
        }
    }

    pub async fn vote_invoke(&self, request: VoteRequest) -> VoteResponse {
        let _guard = self.lock.lock().await;
        NodeInner::ensure_exist_greater_term_and_change_role(&self.node, request.term).await;

        let role = self.node.role.lock().await;
        match &*role {
            Role::Follower(follower) => follower.get_vote(&request).await,
            _ => VoteResponse {
                term: self.node.state.current_term().await,
                vote_granted: false,
            },
        }
    }

    pub async fn install_snapshot_invoke(
        &self,
        request: InstallSnapshotRequest,
    ) -> InstallSnapshotResponse {
        let _guard = self.lock.lock().await;
        NodeInner::ensure_exist_greater_term_and_change_role(&self.node, request.term).await;

        let role = self.node.role.lock().await;
        match &*role {
            Role::Follower(follower) => follower.installed_snapshot(&request).await,
            _ => InstallSnapshotResponse {
                term: self.node.state.current_term().await,
            },
        }
    }
}
