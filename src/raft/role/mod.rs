mod candidate;
mod follower;
mod leader;

pub(crate) use candidate::Candidate;
pub(crate) use follower::Follower;
pub(crate) use leader::Leader;

use crate::raft::alarm::ElectionAlarm;

/// The three behaviors a node can be running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleKind::Follower => write!(f, "follower"),
            RoleKind::Candidate => write!(f, "candidate"),
            RoleKind::Leader => write!(f, "leader"),
        }
    }
}

/// The currently active role. Transitions replace the variant wholesale;
/// the outgoing variant's alarm is stopped first and no history is kept.
pub(crate) enum Role {
    Follower(Follower),
    Candidate(Candidate),
    Leader(Leader),
}

impl Role {
    pub(crate) fn kind(&self) -> RoleKind {
        match self {
            Role::Follower(_) => RoleKind::Follower,
            Role::Candidate(_) => RoleKind::Candidate,
            Role::Leader(_) => RoleKind::Leader,
        }
    }

    pub(crate) fn alarm(&self) -> &ElectionAlarm {
        match self {
            Role::Follower(follower) => follower.alarm(),
            Role::Candidate(candidate) => candidate.alarm(),
            Role::Leader(leader) => leader.alarm(),
        }
    }
}
