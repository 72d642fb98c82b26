use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::config::RaftConfig;
use crate::raft::alarm::ElectionAlarm;
use crate::raft::node::NodeInner;
use crate::raft::role::RoleKind;
use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use crate::raft::state::StateController;

/// Passive role: answers votes and replication from the leader, and stands
/// for election when a full alarm cycle passes without legal leader contact.
pub(crate) struct Follower {
    alarm: ElectionAlarm,
    state: Arc<StateController>,
    /// Set by AppendEntries carrying the current term, cleared every alarm
    /// cycle. Shared with the alarm task.
    heard_from_legal_leader: Arc<AtomicBool>,
    /// Learned from the first AppendEntries seen.
    leader_id: Option<String>,
}

impl Follower {
    pub(crate) fn new(
        node: Weak<NodeInner>,
        config: &RaftConfig,
        state: Arc<StateController>,
    ) -> Self {
        let alarm = ElectionAlarm::new(
            config.election_timeout_min_ms,
            config.election_timeout_max_ms,
        );
        let heard_from_legal_leader = Arc::new(AtomicBool::new(false));

        let heard = heard_from_legal_leader.clone();
        alarm.start_before_timewait(move || {
            let node = node.clone();
            let heard = heard.clone();
            async move {
                let Some(node) = node.upgrade() else {
                    return Ok(());
                };
                // Clears the flag either way; acts only if it was not set.
                if !heard.swap(false, Ordering::SeqCst) {
                    tracing::info!("missing leader, standing for election");
                    NodeInner::change_role(&node, RoleKind::Candidate).await;
                }
                Ok(())
            }
        });

        Self {
            alarm,
            state,
            heard_from_legal_leader,
            leader_id: None,
        }
    }

    pub(crate) fn alarm(&self) -> &ElectionAlarm {
        &self.alarm
    }

    pub(crate) fn leader_id(&self) -> Option<&str> {
        self.leader_id.as_deref()
    }

    /// Decide a vote request. Stale terms are denied outright; otherwise a
    /// vote is granted when no conflicting vote exists for this term and the
    /// candidate's log is at least as up-to-date as ours (term first, then
    /// index). The response always carries the current term.
    pub(crate) async fn get_vote(&self, request: &VoteRequest) -> VoteResponse {
        let current_term = self.state.current_term().await;
        let mut vote_granted = false;

        if request.term >= current_term {
            let voted_for = self.state.voted_for().await;
            let free_to_vote = voted_for.is_none()
                || voted_for.as_deref() == Some(request.candidate_id.as_str());
            if free_to_vote
                && self
                    .state
                    .is_up_to_date(request.last_log_term, request.last_log_index)
                    .await
            {
                self.state.update_vote_for(&request.candidate_id).await;
                vote_granted = true;
                tracing::info!(
                    candidate = %request.candidate_id,
                    term = request.term,
                    "voting for candidate"
                );
            }
        }

        VoteResponse {
            term: current_term,
            vote_granted,
        }
    }

    /// Accept replicated entries from the leader. A non-empty local log must
    /// contain the entry at (prev_log_index, prev_log_term) or the request
    /// fails and the leader backs off. Conflicting entries truncate the
    /// local suffix before the new entries land. The commit index follows
    /// min(leader_commit, prev_log_index) once leader_commit passes it, with
    /// the current term synchronized at that point.
    pub(crate) async fn append_entries(
        &mut self,
        request: AppendEntriesRequest,
    ) -> AppendEntriesResponse {
        if self.leader_id.is_none() {
            self.leader_id = Some(request.leader_id.clone());
        }

        let current_term = self.state.current_term().await;
        if request.term == current_term {
            self.heard_from_legal_leader.store(true, Ordering::SeqCst);
        }

        if self.state.log_len().await > 0
            && !self
                .state
                .has_entry(request.prev_log_index, request.prev_log_term)
                .await
        {
            return AppendEntriesResponse {
                term: current_term,
                success: false,
            };
        }

        if !request.entries.is_empty() {
            tracing::debug!(
                count = request.entries.len(),
                leader = %request.leader_id,
                "appending replicated entries"
            );
            self.state.merge_entries(request.entries).await;
        }

        if request.leader_commit > self.state.commit_index().await {
            self.state.update_term(request.term).await;
            let target = request.leader_commit.min(request.prev_log_index);
            if let Err(e) = self.state.update_commit_index(target).await {
                tracing::warn!(error = %e, "commit advancement failed");
            }
        }

        AppendEntriesResponse {
            term: self.state.current_term().await,
            success: true,
        }
    }

    /// Snapshot transfer surface. The term check is real; chunk persistence
    /// and state machine reset are an unimplemented extension point, so the
    /// response only acknowledges the term.
    pub(crate) async fn installed_snapshot(
        &self,
        request: &InstallSnapshotRequest,
    ) -> InstallSnapshotResponse {
        let current_term = self.state.current_term().await;
        if request.term < current_term {
            return InstallSnapshotResponse { term: current_term };
        }
        tracing::debug!(
            leader = %request.leader_id,
            last_included_index = request.last_included_index,
            offset = request.offset,
            done = request.done,
            "snapshot chunk received, transfer not implemented"
        );
        InstallSnapshotResponse { term: current_term }
    }
}
