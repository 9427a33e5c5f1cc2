//! Error types for store operations.

use crate::types::NodeId;
use openraft::BasicNode;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for OpenRaft Raft errors.
pub type RaftError<E = openraft::error::Infallible> = openraft::error::RaftError<NodeId, E>;

/// Type alias for OpenRaft RPC errors.
pub type RPCError<E = openraft::error::Infallible> =
    openraft::error::RPCError<NodeId, BasicNode, RaftError<E>>;

/// Type alias for client write errors.
pub type ClientWriteError = openraft::error::ClientWriteError<NodeId, BasicNode>;

/// Type alias for initialize errors.
pub type InitializeError = openraft::error::InitializeError<NodeId, BasicNode>;

/// Errors surfaced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write or membership change was attempted on a non-leader node.
    /// Callers should locate the leader and retry there; the command was
    /// never appended to the log.
    #[error("not the leader, leader is node {leader:?}")]
    NotLeader {
        /// The current leader if this node knows one.
        leader: Option<NodeId>,
    },

    /// A submitted command did not commit within the raft timeout. The
    /// entry may still commit later; set and delete are idempotent, so
    /// retrying is safe.
    #[error("timed out waiting for the command to commit")]
    Timeout,

    /// The log, stable, or snapshot store could not be opened.
    #[error("failed to open store: {0}")]
    StoreOpen(String),

    /// The Raft transport could not bind its listen address.
    #[error("failed to bind raft transport: {0}")]
    TransportBind(String),

    /// A byte record could not be decoded as a command.
    #[error("malformed command record: {0}")]
    MalformedCommand(#[source] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Raft consensus error.
    #[error("raft error: {0}")]
    Raft(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Collapse a client-write failure into the store's error kinds,
    /// keeping the leader hint when the engine rejected a non-leader
    /// submit.
    pub(crate) fn from_write_error(err: RaftError<ClientWriteError>) -> Self {
        match err {
            openraft::error::RaftError::APIError(ClientWriteError::ForwardToLeader(forward)) => {
                StoreError::NotLeader {
                    leader: forward.leader_id,
                }
            }
            other => StoreError::Raft(other.to_string()),
        }
    }
}
