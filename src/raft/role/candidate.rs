use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::config::RaftConfig;
use crate::raft::alarm::ElectionAlarm;
use crate::raft::node::NodeInner;
use crate::raft::role::RoleKind;
use crate::raft::rpc::VoteRequest;

/// Election role: the alarm repeatedly triggers an election attempt, the
/// first one immediately on entry.
pub(crate) struct Candidate {
    alarm: ElectionAlarm,
}

impl Candidate {
    pub(crate) fn new(node: Weak<NodeInner>, config: &RaftConfig) -> Self {
        let alarm = ElectionAlarm::new(
            config.election_timeout_min_ms,
            config.election_timeout_max_ms,
        );
        alarm.start_after_timewait(move || {
            let node = node.clone();
            async move {
                let Some(node) = node.upgrade() else {
                    return Ok(());
                };
                run_election(node).await;
                Ok(())
            }
        });
        Self { alarm }
    }

    pub(crate) fn alarm(&self) -> &ElectionAlarm {
        &self.alarm
    }
}

struct VoteTally {
    votes: usize,
    transferred_leader: bool,
}

/// One election attempt: bump the term, request votes from every peer
/// concurrently, and promote to leader exactly once if the tally crosses the
/// majority threshold. The attempt waits for every peer call to finish;
/// failed or timed-out peers simply contribute no vote.
async fn run_election(node: Arc<NodeInner>) {
    let term = node.state.current_term().await + 1;
    node.state.update_term(term).await;
    tracing::info!(term, "starting election");

    let request = VoteRequest {
        term,
        candidate_id: node.config.node_id.clone(),
        last_log_index: node.state.last_log_index().await,
        last_log_term: node.state.last_log_term().await,
    };

    let quorum = node.peers.len() / 2 + 1;
    // Own vote counts first.
    let tally = Arc::new(Mutex::new(VoteTally {
        votes: 1,
        transferred_leader: false,
    }));

    let mut requests = JoinSet::new();
    for peer in &node.peers {
        let client = peer.client.clone();
        let address = peer.address.clone();
        let request = request.clone();
        let node = node.clone();
        let tally = tally.clone();
        requests.spawn(async move {
            match client.vote_invoke(request).await {
                Ok(response) => {
                    if NodeInner::ensure_exist_greater_term_and_change_role(&node, response.term)
                        .await
                    {
                        // Someone is ahead of us; this attempt is over.
                        return;
                    }
                    if response.vote_granted {
                        let mut tally = tally.lock().await;
                        tally.votes += 1;
                        tracing::debug!(peer = %address, votes = tally.votes, "vote received");
                        if !tally.transferred_leader && tally.votes > quorum {
                            tally.transferred_leader = true;
                            NodeInner::change_role(&node, RoleKind::Leader).await;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = %address, error = %e, "vote request failed");
                }
            }
        });
    }

    while requests.join_next().await.is_some() {}
}
