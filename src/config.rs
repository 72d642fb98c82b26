use std::net::SocketAddr;

/// Configuration for a single Raft node.
///
/// Peers are derived from `join_addresses` by excluding the local listen
/// address, so the same join list can be handed to every node in the
/// cluster. By deployment convention a node's id is its listen address;
/// this is what lets a follower resolve the leader id it learns from
/// AppendEntries back to a peer when redirecting client commands.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Unique identifier for this node, carried in vote and replication RPCs.
    pub node_id: String,
    /// Human-readable node name, used only for logging.
    pub node_name: String,
    /// Address the RPC server binds to.
    pub listen_addr: SocketAddr,
    /// Addresses of every cluster member, including this node.
    pub join_addresses: Vec<String>,
    /// Shared secret checked on every inbound RPC envelope.
    pub cluster_token: String,
    /// Reconnect attempts per outbound call before giving up.
    pub retry_count: u32,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        // SAFETY: This is a hardcoded valid address that will always parse
        let listen_addr: SocketAddr = "127.0.0.1:7201"
            .parse()
            .expect("default listen address is valid");
        Self {
            node_id: listen_addr.to_string(),
            node_name: "raft-node".to_string(),
            listen_addr,
            join_addresses: Vec::new(),
            cluster_token: String::new(),
            retry_count: 3,
            election_timeout_min_ms: 1500,
            election_timeout_max_ms: 3000,
            heartbeat_interval_ms: 500,
        }
    }
}

impl RaftConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            node_id: listen_addr.to_string(),
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_join(mut self, addr: impl Into<String>) -> Self {
        self.join_addresses.push(addr.into());
        self
    }

    pub fn with_cluster_token(mut self, token: impl Into<String>) -> Self {
        self.cluster_token = token.into();
        self
    }

    /// Cluster members excluding this node.
    pub fn peer_addresses(&self) -> Vec<String> {
        let local = self.listen_addr.to_string();
        self.join_addresses
            .iter()
            .filter(|addr| **addr != local)
            .cloned()
            .collect()
    }
}
