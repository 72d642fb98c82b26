use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("Not the leader, known leader is {0:?}")]
    NotLeader(Option<String>),

    #[error("Cluster token is illegal")]
    IllegalClusterToken,

    #[error("Rpc error: {0}")]
    Rpc(String),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Log entry {0} is missing from the local log")]
    MissingLogEntry(u64),

    #[error("State machine apply failed: {0}")]
    Apply(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RaftError>;
