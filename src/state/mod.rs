//! The replicated key-value state machine.
//!
//! The state machine is the core of the store: it receives committed log
//! entries in index order, applies them to the in-memory map, and supports
//! snapshots for log compaction, state transfer, and restart recovery.
//!
//! The map and its lock are shared between the consensus engine (which
//! applies) and every local reader (which serves gets), as two capability
//! views over one inner value; neither side owns the other.
//!
//! ## Module structure
//!
//! - `snapshot`: the durable file snapshot store
//! - `traits`: OpenRaft trait implementations

mod snapshot;
mod traits;

pub use snapshot::{SnapshotStore, StoredSnapshot, RETAIN_SNAPSHOT_COUNT};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use tokio::sync::RwLock;

use crate::command::{Applied, Command};
use crate::peers;
use crate::types::{StoreLogId, StoreStoredMembership};

/// The replicated state: the key-value map plus the log position and
/// membership it reflects.
#[derive(Debug, Default)]
pub struct StoreState {
    /// The key-value map. A BTreeMap keeps snapshot bytes a deterministic
    /// function of the map contents.
    pub data: BTreeMap<String, String>,
    /// Last applied log ID.
    pub last_applied_log: Option<StoreLogId>,
    /// Last membership configuration.
    pub last_membership: StoreStoredMembership,
}

/// The Raft state machine.
///
/// Holds the replicated map behind a read-write lock: gets take the lock
/// shared, the apply path and snapshot restore take it exclusive, so every
/// reader observes a prefix-consistent sequence of applied commands.
#[derive(Debug)]
pub struct StoreStateMachine {
    /// The replicated state.
    state: RwLock<StoreState>,
    /// Distinguishes snapshots taken at the same log position.
    snapshot_idx: AtomicU64,
    /// Durable snapshot files.
    snapshots: SnapshotStore,
    /// Data directory holding the peer directory file.
    data_dir: PathBuf,
}

impl StoreStateMachine {
    /// Open the state machine, restoring the newest durable snapshot if one
    /// exists. Log entries newer than the snapshot are replayed by the
    /// consensus engine afterwards.
    pub fn open(data_dir: &Path) -> Result<Self, std::io::Error> {
        let snapshots = SnapshotStore::open(data_dir.join("snapshots"))?;

        let mut state = StoreState::default();
        if let Some(snap) = snapshots.load_latest()? {
            state.data = serde_json::from_slice(&snap.data)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            state.last_applied_log = snap.meta.last_log_id;
            state.last_membership = snap.meta.last_membership.clone();
            tracing::info!(
                snapshot_id = %snap.meta.snapshot_id,
                keys = state.data.len(),
                "restored state machine from snapshot"
            );
        }

        Ok(Self {
            state: RwLock::new(state),
            snapshot_idx: AtomicU64::new(0),
            snapshots,
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Current value for `key`, or the empty string when absent.
    ///
    /// Served from the local replica without consulting the log; on a
    /// follower the result may lag a write that already succeeded on the
    /// leader.
    pub async fn get(&self, key: &str) -> String {
        self.state
            .read()
            .await
            .data
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// The log position of the last applied entry, if any.
    pub async fn last_applied(&self) -> Option<StoreLogId> {
        self.state.read().await.last_applied_log
    }

    /// Read-only view of the replicated state.
    pub async fn state(&self) -> tokio::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().await
    }

    /// Rewrite the peer directory file from a committed membership.
    fn sync_peer_list(&self, membership: &StoreStoredMembership) -> Result<(), std::io::Error> {
        let addrs: Vec<String> = membership
            .nodes()
            .map(|(_, node)| node.addr.clone())
            .filter(|addr| !addr.is_empty())
            .collect();
        peers::write_peers(&self.data_dir, &addrs)
    }
}

/// Apply one committed command to the map.
///
/// Total over the command set: both operations succeed on any map state, so
/// replicas can never diverge on a committed entry.
fn apply_command(state: &mut StoreState, cmd: Command) -> Applied {
    match cmd {
        Command::Set { key, value } => {
            state.data.insert(key, value);
        }
        Command::Delete { key } => {
            state.data.remove(&key);
        }
    }
    Applied
}
