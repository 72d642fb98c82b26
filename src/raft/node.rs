use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::RaftConfig;
use crate::error::Result;
use crate::machine::StateMachine;
use crate::raft::host::Host;
use crate::raft::role::{Candidate, Follower, Leader, Role, RoleKind};
use crate::raft::rpc::PeerClient;
use crate::raft::state::StateController;
use crate::transport::{RpcServer, TcpPeerClient};

/// A remote cluster member: its address and the handle used to call it.
pub struct Peer {
    pub address: String,
    pub client: Arc<dyn PeerClient>,
}

impl Peer {
    pub fn new(address: impl Into<String>, client: Arc<dyn PeerClient>) -> Self {
        Self {
            address: address.into(),
            client,
        }
    }
}

/// Shared node internals: the fixed peer set, the state controller, and the
/// single live role. Role timers and RPC fan-out tasks hold a weak handle to
/// this and go quiet once the node is gone.
pub(crate) struct NodeInner {
    pub(crate) config: RaftConfig,
    pub(crate) state: Arc<StateController>,
    pub(crate) peers: Vec<Peer>,
    pub(crate) role: Mutex<Role>,
    term_gate: Mutex<()>,
}

impl NodeInner {
    /// The single safety chokepoint, invoked on every inbound request and
    /// every outbound response: an observed term above ours updates the term
    /// and forces a transition to follower.
    pub(crate) fn ensure_exist_greater_term_and_change_role<'a>(
        node: &'a Arc<NodeInner>,
        term: u64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            let _gate = node.term_gate.lock().await;
            if term > node.state.current_term().await {
                tracing::info!(term, "observed a term greater than the current term");
                node.state.update_term(term).await;
                NodeInner::change_role(node, RoleKind::Follower).await;
                true
            } else {
                false
            }
        })
    }

    /// Replace the active role. The outgoing role's alarm is stopped before
    /// the new role (and its alarm) is constructed; already in the target
    /// role is a no-op.
    pub(crate) async fn change_role(node: &Arc<NodeInner>, target: RoleKind) {
        let mut role = node.role.lock().await;
        if role.kind() == target {
            return;
        }
        role.alarm().stop();
        tracing::info!(from = %role.kind(), to = %target, "changing role");
        *role = match target {
            RoleKind::Follower => Role::Follower(Follower::new(
                Arc::downgrade(node),
                &node.config,
                node.state.clone(),
            )),
            RoleKind::Candidate => {
                Role::Candidate(Candidate::new(Arc::downgrade(node), &node.config))
            }
            RoleKind::Leader => Role::Leader(Leader::new(node).await),
        };
    }
}

/// A single consensus participant. Owns the peer set and the active role,
/// starts life as a follower, and serves the cluster RPC surface.
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
    host: Arc<Host>,
}

impl Node {
    /// Build a node whose peers speak the TCP transport. Peers are the join
    /// list minus the local address. Must be called within a tokio runtime:
    /// the initial follower's election alarm starts here.
    pub fn new(config: RaftConfig, machine: Arc<dyn StateMachine>) -> Self {
        let peers = config
            .peer_addresses()
            .into_iter()
            .map(|address| {
                let client = TcpPeerClient::new(
                    address.clone(),
                    config.cluster_token.clone(),
                    config.retry_count,
                );
                Peer::new(address, Arc::new(client) as Arc<dyn PeerClient>)
            })
            .collect();
        Self::with_peers(config, peers, machine)
    }

    /// Build a node against an explicit peer set (custom transports, tests).
    pub fn with_peers(
        config: RaftConfig,
        peers: Vec<Peer>,
        machine: Arc<dyn StateMachine>,
    ) -> Self {
        let state = Arc::new(StateController::new(machine));
        let inner = Arc::new_cyclic(|weak: &Weak<NodeInner>| {
            let follower = Follower::new(weak.clone(), &config, state.clone());
            NodeInner {
                config,
                state,
                peers,
                role: Mutex::new(Role::Follower(follower)),
                term_gate: Mutex::new(()),
            }
        });
        let host = Arc::new(Host::new(inner.clone()));
        Self { inner, host }
    }

    pub fn host(&self) -> Arc<Host> {
        self.host.clone()
    }

    pub fn config(&self) -> &RaftConfig {
        &self.inner.config
    }

    /// Serve cluster RPCs until the shutdown token is cancelled.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            node_id = %self.inner.config.node_id,
            name = %self.inner.config.node_name,
            addr = %self.inner.config.listen_addr,
            peers = self.inner.peers.len(),
            "raft agent is running"
        );
        let server = RpcServer::new(self.host.clone(), self.inner.config.cluster_token.clone());
        server.serve(self.inner.config.listen_addr, shutdown).await
    }

    pub async fn role(&self) -> RoleKind {
        self.inner.role.lock().await.kind()
    }

    pub async fn current_term(&self) -> u64 {
        self.inner.state.current_term().await
    }

    pub async fn commit_index(&self) -> u64 {
        self.inner.state.commit_index().await
    }

    pub async fn last_applied(&self) -> u64 {
        self.inner.state.last_applied().await
    }

    pub async fn last_log_index(&self) -> u64 {
        self.inner.state.last_log_index().await
    }

    pub async fn log_len(&self) -> usize {
        self.inner.state.log_len().await
    }

    pub async fn entry(&self, index: u64) -> Option<crate::raft::state::LogEntry> {
        self.inner.state.entry(index).await
    }
}
