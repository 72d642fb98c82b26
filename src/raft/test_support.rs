//! Scripted peers for exercising election and replication rounds without a
//! live transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{RaftError, Result};
use crate::raft::node::Peer;
use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, ClientRequest, ClientResponse,
    InstallSnapshotRequest, InstallSnapshotResponse, PeerClient, VoteRequest, VoteResponse,
};

pub(crate) struct MockPeer {
    unreachable: bool,
    vote_response: VoteResponse,
    append_script: Mutex<VecDeque<AppendEntriesResponse>>,
    append_default: AppendEntriesResponse,
    pub(crate) append_requests: Mutex<Vec<AppendEntriesRequest>>,
    pub(crate) client_requests: Mutex<Vec<ClientRequest>>,
}

impl MockPeer {
    fn base(vote_granted: bool, term: u64, append_success: bool) -> Self {
        Self {
            unreachable: false,
            vote_response: VoteResponse { term, vote_granted },
            append_script: Mutex::new(VecDeque::new()),
            append_default: AppendEntriesResponse {
                term,
                success: append_success,
            },
            append_requests: Mutex::new(Vec::new()),
            client_requests: Mutex::new(Vec::new()),
        }
    }

    /// Grants every vote and accepts every append at the given term.
    pub(crate) fn granting(term: u64) -> Self {
        Self::base(true, term, true)
    }

    /// Denies votes and rejects appends at the given term.
    pub(crate) fn denying(term: u64) -> Self {
        Self::base(false, term, false)
    }

    /// Accepts appends but never grants a vote.
    pub(crate) fn append_ok(term: u64) -> Self {
        Self::base(false, term, true)
    }

    /// Every call fails at the transport level.
    pub(crate) fn dead() -> Self {
        let mut mock = Self::base(false, 0, false);
        mock.unreachable = true;
        mock
    }

    /// Queue append responses consumed in order before the default applies.
    pub(crate) fn with_append_script(self, responses: Vec<AppendEntriesResponse>) -> Self {
        *self.append_script.lock().unwrap() = responses.into();
        self
    }

    pub(crate) fn into_peer(self, address: &str) -> (Arc<MockPeer>, Peer) {
        let mock = Arc::new(self);
        let peer = Peer::new(address, mock.clone() as Arc<dyn PeerClient>);
        (mock, peer)
    }
}

#[async_trait]
impl PeerClient for MockPeer {
    async fn append_entries_invoke(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        if self.unreachable {
            return Err(RaftError::Rpc("peer unreachable".to_string()));
        }
        self.append_requests.lock().unwrap().push(request);
        let scripted = self.append_script.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| self.append_default.clone()))
    }

    async fn vote_invoke(&self, _request: VoteRequest) -> Result<VoteResponse> {
        if self.unreachable {
            return Err(RaftError::Rpc("peer unreachable".to_string()));
        }
        Ok(self.vote_response.clone())
    }

    async fn install_snapshot_invoke(
        &self,
        request: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        if self.unreachable {
            return Err(RaftError::Rpc("peer unreachable".to_string()));
        }
        Ok(InstallSnapshotResponse { term: request.term })
    }

    async fn client_invoke(&self, request: ClientRequest) -> Result<ClientResponse> {
        if self.unreachable {
            return Err(RaftError::Rpc("peer unreachable".to_string()));
        }
        self.client_requests.lock().unwrap().push(request);
        Ok(ClientResponse::accepted())
    }
}
