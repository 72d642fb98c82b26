use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::error::Result;
use crate::raft::alarm::ElectionAlarm;
use crate::raft::node::NodeInner;
use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, ClientRequest, ClientResponse, PeerClient,
};
use crate::raft::state::{LeaderVolatileState, LogEntry, StateController};

/// Active role: accepts client commands into an uncommitted buffer and
/// drives the fixed-interval heartbeat that replicates and commits them.
pub(crate) struct Leader {
    alarm: ElectionAlarm,
    state: Arc<StateController>,
    /// Commands acknowledged to clients but not yet replicated to a
    /// majority; moved into the durable log when a round commits.
    uncommitted: Arc<Mutex<Vec<LogEntry>>>,
    /// Per-peer replication progress, discarded with this role instance.
    replication: Arc<Mutex<HashMap<String, LeaderVolatileState>>>,
}

impl Leader {
    pub(crate) async fn new(node: &Arc<NodeInner>) -> Self {
        let last_log_index = node.state.last_log_index().await;
        let mut progress = HashMap::new();
        for peer in &node.peers {
            progress.insert(
                peer.address.clone(),
                LeaderVolatileState {
                    next_index: last_log_index,
                    match_index: 0,
                },
            );
        }
        let replication = Arc::new(Mutex::new(progress));
        let uncommitted = Arc::new(Mutex::new(Vec::new()));

        let alarm = ElectionAlarm::new(
            node.config.election_timeout_min_ms,
            node.config.election_timeout_max_ms,
        );
        let weak = Arc::downgrade(node);
        let beat_uncommitted = uncommitted.clone();
        let beat_replication = replication.clone();
        alarm.start(
            move || {
                let node = weak.clone();
                let uncommitted = beat_uncommitted.clone();
                let replication = beat_replication.clone();
                async move {
                    let Some(node) = node.upgrade() else {
                        return Ok(());
                    };
                    heartbeat_round(node, uncommitted, replication).await;
                    Ok(())
                }
            },
            node.config.heartbeat_interval_ms,
            false,
            false,
        );

        Self {
            alarm,
            state: node.state.clone(),
            uncommitted,
            replication,
        }
    }

    pub(crate) fn alarm(&self) -> &ElectionAlarm {
        &self.alarm
    }

    /// Accept a client command: the entry is buffered and acknowledged
    /// immediately, becoming durable and committable only once a heartbeat
    /// round replicates it to a majority. Indexes continue the sequence
    /// across the durable log and the buffer.
    pub(crate) async fn command(&self, request: &ClientRequest) -> ClientResponse {
        let mut buffer = self.uncommitted.lock().await;
        let last_index = match buffer.last() {
            Some(entry) => entry.index,
            None => self.state.last_log_index().await,
        };
        let entry = LogEntry {
            term: self.state.current_term().await,
            index: last_index + 1,
            command: request.command.clone(),
        };
        tracing::info!(index = entry.index, term = entry.term, "command accepted");
        buffer.push(entry);
        ClientResponse::accepted()
    }

    #[cfg(test)]
    pub(crate) async fn buffered(&self) -> Vec<LogEntry> {
        self.uncommitted.lock().await.clone()
    }
}

struct RoundProgress {
    replicated: usize,
    committed_log: bool,
}

/// One heartbeat round: probe every peer concurrently, tally successes, and
/// commit the buffer exactly once when a strict majority has acknowledged.
/// A response carrying a higher term demotes this node via the safety gate.
async fn heartbeat_round(
    node: Arc<NodeInner>,
    uncommitted: Arc<Mutex<Vec<LogEntry>>>,
    replication: Arc<Mutex<HashMap<String, LeaderVolatileState>>>,
) {
    let quorum = node.peers.len() / 2 + 1;
    // Self counts as already replicated.
    let round = Arc::new(Mutex::new(RoundProgress {
        replicated: 1,
        committed_log: false,
    }));

    let mut probes = JoinSet::new();
    for peer in &node.peers {
        let client = peer.client.clone();
        let address = peer.address.clone();
        let node = node.clone();
        let uncommitted = uncommitted.clone();
        let replication = replication.clone();
        let round = round.clone();
        probes.spawn(async move {
            let next_index = replication
                .lock()
                .await
                .get(&address)
                .map(|s| s.next_index)
                .unwrap_or(0);

            let response = match replicate(
                client.as_ref(),
                &address,
                &node,
                &uncommitted,
                &replication,
                next_index,
            )
            .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(peer = %address, error = %e, "append entries failed");
                    return;
                }
            };

            if NodeInner::ensure_exist_greater_term_and_change_role(&node, response.term).await {
                return;
            }

            if response.success {
                let last_log_index = node.state.last_log_index().await;
                {
                    let mut replication = replication.lock().await;
                    if let Some(peer_state) = replication.get_mut(&address) {
                        peer_state.next_index = last_log_index + 1;
                        peer_state.match_index += 1;
                    }
                }

                let mut round = round.lock().await;
                round.replicated += 1;
                if !round.committed_log && round.replicated > quorum {
                    round.committed_log = true;
                    commit_buffered(&node, &uncommitted).await;
                }
            }
        });
    }

    while probes.join_next().await.is_some() {}
}

/// Replication probe against one peer. On a log-inconsistency failure the
/// peer's next_index walks backward one step at a time until the follower
/// accepts or the search bottoms out; a failure whose term is ahead of ours
/// is returned as-is for the safety gate.
async fn replicate(
    client: &dyn PeerClient,
    address: &str,
    node: &Arc<NodeInner>,
    uncommitted: &Mutex<Vec<LogEntry>>,
    replication: &Mutex<HashMap<String, LeaderVolatileState>>,
    mut next_index: u64,
) -> Result<AppendEntriesResponse> {
    loop {
        let term = node.state.current_term().await;
        let entries: Vec<LogEntry> = uncommitted
            .lock()
            .await
            .iter()
            .filter(|e| e.index >= next_index)
            .cloned()
            .collect();
        tracing::debug!(peer = %address, term, count = entries.len(), "syncing follower");

        let request = AppendEntriesRequest {
            term,
            leader_id: node.config.node_id.clone(),
            prev_log_index: node.state.last_log_index().await,
            prev_log_term: node.state.last_log_term().await,
            entries,
            leader_commit: node.state.commit_index().await,
        };
        let response = client.append_entries_invoke(request).await?;

        if response.success || response.term > term || next_index == 0 {
            return Ok(response);
        }

        next_index -= 1;
        if let Some(peer_state) = replication.lock().await.get_mut(address) {
            peer_state.next_index = next_index;
        }
        tracing::debug!(peer = %address, next_index, "follower log mismatch, backing off");
    }
}

/// Move the buffered entries into the durable log and advance the commit
/// index by one round. Apply failures are logged; the entries stay durable.
async fn commit_buffered(node: &Arc<NodeInner>, uncommitted: &Mutex<Vec<LogEntry>>) {
    let entries = {
        let mut buffer = uncommitted.lock().await;
        std::mem::take(&mut *buffer)
    };
    if entries.is_empty() {
        return;
    }
    tracing::info!(count = entries.len(), "majority acknowledged, committing");
    node.state.append_log_entries(entries).await;
    if let Err(e) = node.state.increase_commit_index().await {
        tracing::warn!(error = %e, "commit advancement failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::RaftConfig;
    use crate::machine::InMemoryStateMachine;
    use crate::raft::node::{Node, Peer};
    use crate::raft::role::RoleKind;
    use crate::raft::test_support::MockPeer;

    fn entry(term: u64, index: u64) -> LogEntry {
        LogEntry {
            term,
            index,
            command: format!("cmd-{index}"),
        }
    }

    fn node_with_peers(
        peers: Vec<Peer>,
    ) -> (Arc<InMemoryStateMachine>, Node) {
        let config = RaftConfig::new("127.0.0.1:7201".parse().unwrap());
        let machine = Arc::new(InMemoryStateMachine::new());
        (machine.clone(), Node::with_peers(config, peers, machine))
    }

    fn progress_map(
        node: &Node,
        next_index: u64,
    ) -> Arc<Mutex<HashMap<String, LeaderVolatileState>>> {
        let mut map = HashMap::new();
        for peer in &node.inner.peers {
            map.insert(
                peer.address.clone(),
                LeaderVolatileState {
                    next_index,
                    match_index: 0,
                },
            );
        }
        Arc::new(Mutex::new(map))
    }

    #[tokio::test]
    async fn command_continues_the_index_sequence() {
        let (_, node) = node_with_peers(vec![]);
        node.inner.state.update_term(1).await;
        let leader = Leader::new(&node.inner).await;

        let first = ClientRequest {
            command: "set x=1".to_string(),
        };
        let second = ClientRequest {
            command: "set y=2".to_string(),
        };
        assert!(leader.command(&first).await.success);
        assert!(leader.command(&second).await.success);

        let buffered = leader.buffered().await;
        assert_eq!(buffered.len(), 2);
        assert_eq!(buffered[0].index, 1);
        assert_eq!(buffered[1].index, 2);
        assert_eq!(buffered[0].term, 1);
        // Nothing is durable or committed yet.
        assert_eq!(node.log_len().await, 0);
        assert_eq!(node.commit_index().await, 0);
    }

    #[tokio::test]
    async fn round_commits_buffer_once_on_majority() {
        let (mock_b, peer_b) = MockPeer::append_ok(0).into_peer("127.0.0.1:7202");
        let (_, peer_c) = MockPeer::append_ok(0).into_peer("127.0.0.1:7203");
        let (machine, node) = node_with_peers(vec![peer_b, peer_c]);
        node.inner.state.update_term(1).await;

        let uncommitted = Arc::new(Mutex::new(vec![entry(1, 1)]));
        let replication = progress_map(&node, 0);
        heartbeat_round(node.inner.clone(), uncommitted.clone(), replication.clone()).await;

        assert_eq!(node.log_len().await, 1);
        assert_eq!(node.commit_index().await, 1);
        assert_eq!(node.last_applied().await, 1);
        assert_eq!(machine.applied().len(), 1);
        assert!(uncommitted.lock().await.is_empty());

        // The buffered entry rode along with the probe.
        let requests = mock_b.append_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].entries.len(), 1);
        assert_eq!(requests[0].entries[0].index, 1);

        let replication = replication.lock().await;
        let progress = replication.get("127.0.0.1:7202").unwrap();
        assert_eq!(progress.next_index, 1);
        assert_eq!(progress.match_index, 1);
    }

    #[tokio::test]
    async fn no_commit_without_majority() {
        let (_, peer_b) = MockPeer::append_ok(0).into_peer("127.0.0.1:7202");
        let (_, peer_c) = MockPeer::dead().into_peer("127.0.0.1:7203");
        let (machine, node) = node_with_peers(vec![peer_b, peer_c]);
        node.inner.state.update_term(1).await;

        let uncommitted = Arc::new(Mutex::new(vec![entry(1, 1)]));
        let replication = progress_map(&node, 0);
        heartbeat_round(node.inner.clone(), uncommitted.clone(), replication).await;

        // One ack plus self does not exceed the threshold of two.
        assert_eq!(node.commit_index().await, 0);
        assert_eq!(node.log_len().await, 0);
        assert_eq!(uncommitted.lock().await.len(), 1);
        assert!(machine.applied().is_empty());
    }

    #[tokio::test]
    async fn failed_probe_walks_next_index_backward() {
        let fail = AppendEntriesResponse {
            term: 0,
            success: false,
        };
        let (mock, peer) = MockPeer::append_ok(0)
            .with_append_script(vec![fail.clone(), fail])
            .into_peer("127.0.0.1:7202");
        let (_, node) = node_with_peers(vec![peer]);
        node.inner.state.update_term(1).await;

        let uncommitted = Arc::new(Mutex::new(vec![entry(1, 1), entry(1, 2)]));
        let replication = progress_map(&node, 2);
        heartbeat_round(node.inner.clone(), uncommitted.clone(), replication.clone()).await;

        // Three attempts: next_index 2, then 1, then 0.
        let requests = mock.append_requests.lock().unwrap();
        let carried: Vec<usize> = requests.iter().map(|r| r.entries.len()).collect();
        assert_eq!(carried, vec![1, 2, 2]);
        drop(requests);

        // Single peer: one ack plus self crosses the threshold of one.
        assert_eq!(node.log_len().await, 2);
        assert_eq!(node.commit_index().await, 1);
        assert!(uncommitted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn higher_term_response_stops_the_round() {
        let (_, peer_b) = MockPeer::denying(99).into_peer("127.0.0.1:7202");
        let (_, peer_c) = MockPeer::denying(99).into_peer("127.0.0.1:7203");
        let (machine, node) = node_with_peers(vec![peer_b, peer_c]);
        node.inner.state.update_term(1).await;

        let uncommitted = Arc::new(Mutex::new(vec![entry(1, 1)]));
        let replication = progress_map(&node, 0);
        heartbeat_round(node.inner.clone(), uncommitted.clone(), replication).await;

        assert_eq!(node.role().await, RoleKind::Follower);
        assert_eq!(node.current_term().await, 99);
        assert_eq!(node.commit_index().await, 0);
        assert!(machine.applied().is_empty());
        // The command stays buffered; it was never acknowledged by a majority.
        assert_eq!(uncommitted.lock().await.len(), 1);
    }
}
