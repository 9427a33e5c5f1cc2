//! Store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::NodeId;

/// Configuration for one store node. Resolved once at open and immutable
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// This node's unique ID in the cluster (1-based).
    pub node_id: NodeId,

    /// Address this node listens on for Raft RPC (e.g. "127.0.0.1:11001").
    pub raft_bind: String,

    /// Address advertised to other nodes. If not set, uses `raft_bind`.
    pub advertise_addr: Option<String>,

    /// Directory holding the log store, stable store, snapshots, and the
    /// peer directory.
    pub data_dir: PathBuf,

    /// Raft timing configuration.
    pub raft: RaftTuning,

    /// Create a snapshot after this many log entries since the last one.
    /// Defaults to the consensus library's own cadence.
    pub snapshot_threshold: u64,
}

/// Raft timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftTuning {
    /// Election timeout range (min, max) in milliseconds. A random value in
    /// this range is chosen for each election; must be well above the
    /// heartbeat interval to avoid spurious elections.
    pub election_timeout_ms: (u64, u64),

    /// Interval at which the leader sends heartbeats, in milliseconds.
    pub heartbeat_interval_ms: u64,

    /// Maximum entries per AppendEntries RPC.
    pub max_entries_per_append: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            raft_bind: "127.0.0.1:11001".to_string(),
            advertise_addr: None,
            data_dir: PathBuf::from("./raftkv-data"),
            raft: RaftTuning::default(),
            // OpenRaft's default snapshot policy: logs since last snapshot.
            snapshot_threshold: 5000,
        }
    }
}

impl Default for RaftTuning {
    fn default() -> Self {
        Self {
            election_timeout_ms: (150, 300),
            heartbeat_interval_ms: 50,
            max_entries_per_append: 100,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration builder.
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// The address other members use to reach this node (falls back to the
    /// bind address).
    pub fn advertise_addr(&self) -> &str {
        self.advertise_addr.as_deref().unwrap_or(&self.raft_bind)
    }

    /// Get the heartbeat interval as a Duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.raft.heartbeat_interval_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.node_id == 0 {
            return Err("node_id must be > 0".to_string());
        }

        if self.raft_bind.is_empty() {
            return Err("raft_bind is required".to_string());
        }

        if self.data_dir.as_os_str().is_empty() {
            return Err("data_dir is required".to_string());
        }

        let (min_election, max_election) = self.raft.election_timeout_ms;
        if min_election > max_election {
            return Err(format!(
                "election timeout range is inverted: ({}, {})",
                min_election, max_election
            ));
        }
        if self.raft.heartbeat_interval_ms >= min_election / 2 {
            return Err(format!(
                "heartbeat_interval_ms ({}) should be << election_timeout_ms ({})",
                self.raft.heartbeat_interval_ms, min_election
            ));
        }

        Ok(())
    }
}

/// Builder for [`StoreConfig`].
#[derive(Debug, Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the node ID.
    pub fn node_id(mut self, id: NodeId) -> Self {
        self.config.node_id = id;
        self
    }

    /// Set the Raft bind address.
    pub fn raft_bind(mut self, addr: impl Into<String>) -> Self {
        self.config.raft_bind = addr.into();
        self
    }

    /// Set the advertised Raft address.
    pub fn advertise_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.advertise_addr = Some(addr.into());
        self
    }

    /// Set the data directory.
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the election timeout range in milliseconds.
    pub fn election_timeout_ms(mut self, min: u64, max: u64) -> Self {
        self.config.raft.election_timeout_ms = (min, max);
        self
    }

    /// Set the heartbeat interval in milliseconds.
    pub fn heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.config.raft.heartbeat_interval_ms = ms;
        self
    }

    /// Set the snapshot threshold.
    pub fn snapshot_threshold(mut self, entries: u64) -> Self {
        self.config.snapshot_threshold = entries;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<StoreConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}
