pub mod config;
pub mod error;
pub mod machine;
pub mod raft;
pub mod shutdown;
pub mod transport;

pub use config::RaftConfig;
pub use error::{RaftError, Result};
pub use machine::{FileStateMachine, InMemoryStateMachine, StateMachine};
pub use raft::{Node, Peer, RoleKind};
