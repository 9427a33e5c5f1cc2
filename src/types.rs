//! Type wiring for the OpenRaft integration.
//!
//! OpenRaft requires a type configuration naming the concrete types that
//! flow through the protocol; this module pins them for the store.

use crate::command::{Applied, Command};
use openraft::BasicNode;

/// Unique identifier of a cluster member.
pub type NodeId = u64;

openraft::declare_raft_types!(
    /// Raft type configuration: replicated commands in, apply sentinels out.
    pub TypeConfig:
        D = Command,
        R = Applied,
        SnapshotData = std::io::Cursor<Vec<u8>>,
);

/// The Raft instance driving this store.
pub type StoreRaft = openraft::Raft<TypeConfig>;

/// A replicated log entry carrying one command.
pub type StoreEntry = openraft::Entry<TypeConfig>;

/// Position of an entry in the replicated log.
pub type StoreLogId = openraft::LogId<NodeId>;

/// Membership as recorded in the log.
pub type StoreStoredMembership = openraft::StoredMembership<NodeId, BasicNode>;

/// Metadata describing one snapshot.
pub type StoreSnapshotMeta = openraft::SnapshotMeta<NodeId, BasicNode>;

/// A snapshot handed to or received from the consensus engine.
pub type StoreSnapshot = openraft::storage::Snapshot<TypeConfig>;

/// Error reported by the storage layer to the consensus engine.
pub type StoreStorageError = openraft::StorageError<NodeId>;
