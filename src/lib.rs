//! raftkv — a distributed key-value store replicated with Raft.
//!
//! Every write is linearized through a Raft log (via OpenRaft), applied to
//! an in-memory map on each member in log order, persisted durably for
//! recovery, and snapshotted to bound log growth.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐     ┌────────────┐     ┌────────────┐
//! │   Node 1   │     │   Node 2   │     │   Node 3   │
//! │  (Leader)  │     │ (Follower) │     │ (Follower) │
//! │            │     │            │     │            │
//! │ ┌────────┐ │     │ ┌────────┐ │     │ ┌────────┐ │
//! │ │  Raft  │◄┼─────┼─┤  Raft  │◄┼─────┼─┤  Raft  │ │
//! │ │ engine │ │     │ │ engine │ │     │ │ engine │ │
//! │ └───┬────┘ │     │ └───┬────┘ │     │ └───┬────┘ │
//! │     ▼      │     │     ▼      │     │     ▼      │
//! │ ┌────────┐ │     │ ┌────────┐ │     │ ┌────────┐ │
//! │ │ key/val│ │     │ │ key/val│ │     │ │ key/val│ │
//! │ │  map   │ │     │ │  map   │ │     │ │  map   │ │
//! │ └────────┘ │     │ └────────┘ │     │ └────────┘ │
//! └────────────┘     └────────────┘     └────────────┘
//! ```
//!
//! Writes are accepted only on the leader and return once the command has
//! committed and applied. Reads are served from the local map and may be
//! stale on followers; a write that returned success is always visible to a
//! subsequent read on the same node.
//!
//! # Usage
//!
//! ```ignore
//! use raftkv::{Store, StoreConfig};
//!
//! let config = StoreConfig::builder()
//!     .node_id(1)
//!     .raft_bind("127.0.0.1:11001")
//!     .data_dir("/var/lib/raftkv")
//!     .build()?;
//!
//! // Bootstrap a fresh single-node cluster.
//! let store = Store::open(config, true).await?;
//!
//! store.set("user1", "batman").await?;
//! assert_eq!(store.get("user1").await, "batman");
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod http;
pub mod network;
pub mod peers;
pub mod raft;
pub mod state;
pub mod types;

pub use command::{Applied, Command};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use http::HttpService;
pub use raft::{Role, Store, RAFT_TIMEOUT};
pub use state::StoreStateMachine;
pub use types::{NodeId, TypeConfig};

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("raftkv.raft");
}
