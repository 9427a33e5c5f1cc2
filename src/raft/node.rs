//! The store facade: the public entry point for one cluster member.

use openraft::{BasicNode, Config, Raft, ServerState, SnapshotPolicy};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use crate::command::Command;
use crate::config::StoreConfig;
use crate::error::{InitializeError, StoreError, StoreResult};
use crate::network::{NetworkClient, RaftServer};
use crate::peers;
use crate::proto::raft_service_server::RaftServiceServer;
use crate::raft::LogStore;
use crate::state::StoreStateMachine;
use crate::types::{NodeId, StoreRaft};

/// Maximum wall-clock time a submitted command waits for commit before the
/// caller gets a timeout. The entry may still commit afterwards.
pub const RAFT_TIMEOUT: Duration = Duration::from_secs(10);

/// Observable consensus role of a node.
///
/// Learner and shutdown states project to `Follower`: neither accepts
/// writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Candidate,
    Follower,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Leader => write!(f, "leader"),
            Role::Candidate => write!(f, "candidate"),
            Role::Follower => write!(f, "follower"),
        }
    }
}

/// One member of the replicated key-value store.
///
/// All changes to the map are made through Raft consensus: a write is
/// accepted only on the leader, replicated to a majority, and applied to
/// every member's map in log order. Reads are served from the local map and
/// never consult the log, so a follower may return a value older than a
/// write that already succeeded on the leader.
pub struct Store {
    /// This node's ID.
    node_id: NodeId,
    /// The Raft instance.
    raft: Arc<StoreRaft>,
    /// The state machine, shared with the consensus engine.
    state_machine: Arc<StoreStateMachine>,
    /// Shutdown signal for the transport server.
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl Store {
    /// Open the store: read the peer directory, open the log and snapshot
    /// stores, bind the Raft transport, and start the consensus engine.
    ///
    /// With `enable_single` set and no more than one persisted peer, the
    /// node bootstraps a one-member cluster and elects itself. A node that
    /// has previously joined a multi-member cluster never re-bootstraps on
    /// restart: both conjuncts of the predicate are required.
    ///
    /// Opening the same data directory twice in one process is a
    /// programming error.
    pub async fn open(config: StoreConfig, enable_single: bool) -> StoreResult<Self> {
        config.validate().map_err(StoreError::Config)?;

        let node_id = config.node_id;
        std::fs::create_dir_all(&config.data_dir)?;

        // Bootstrap eligibility comes from the persisted peer directory.
        let known_peers = peers::read_peers(&config.data_dir)?;

        let log_store = LogStore::open(&config.data_dir)
            .map_err(|e| StoreError::StoreOpen(format!("log store: {}", e)))?;
        let state_machine = Arc::new(
            StoreStateMachine::open(&config.data_dir)
                .map_err(|e| StoreError::StoreOpen(format!("state machine: {}", e)))?,
        );

        let network = NetworkClient::new();

        let raft_config = Config {
            cluster_name: "raftkv".to_string(),
            election_timeout_min: config.raft.election_timeout_ms.0,
            election_timeout_max: config.raft.election_timeout_ms.1,
            heartbeat_interval: config.raft.heartbeat_interval_ms,
            max_payload_entries: config.raft.max_entries_per_append,
            snapshot_policy: SnapshotPolicy::LogsSinceLast(config.snapshot_threshold),
            ..Default::default()
        };
        let raft_config = Arc::new(
            raft_config
                .validate()
                .map_err(|e| StoreError::Config(e.to_string()))?,
        );

        let raft = Raft::new(
            node_id,
            raft_config,
            network,
            log_store,
            state_machine.clone(),
        )
        .await
        .map_err(|e| StoreError::StoreOpen(format!("consensus engine: {:?}", e)))?;

        let raft = Arc::new(raft);

        // Bind before serving so a bad address fails open instead of dying
        // inside a background task.
        let addr: SocketAddr = config
            .raft_bind
            .parse()
            .map_err(|e: std::net::AddrParseError| StoreError::TransportBind(e.to_string()))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StoreError::TransportBind(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let raft_server = RaftServer::new(Arc::clone(&raft));
        tokio::spawn(async move {
            let incoming = TcpListenerStream::new(listener);
            let _ = Server::builder()
                .add_service(RaftServiceServer::new(raft_server))
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        // Single-node bootstrap needs the explicit opt-in, at most one known
        // peer, and no replicated state already on disk.
        let fresh = state_machine.last_applied().await.is_none();
        if enable_single && known_peers.len() <= 1 && fresh {
            tracing::info!(node_id, "enabling single-node mode");

            let mut members = BTreeMap::new();
            members.insert(
                node_id,
                BasicNode {
                    addr: config.advertise_addr().to_string(),
                },
            );

            match raft.initialize(members).await {
                Ok(()) => {}
                // A prior term or log on disk means the cluster already
                // exists; recovery proceeds from that state instead.
                Err(openraft::error::RaftError::APIError(InitializeError::NotAllowed(_))) => {}
                Err(e) => return Err(StoreError::Raft(e.to_string())),
            }
        }

        tracing::info!(node_id, addr = %config.raft_bind, "store opened");

        Ok(Self {
            node_id,
            raft,
            state_machine,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// The value for `key`, or the empty string when absent.
    ///
    /// Served locally without consulting the log; may be stale on a
    /// follower. On the node where a `set` returned success, the write is
    /// always visible to subsequent gets.
    pub async fn get(&self, key: &str) -> String {
        self.state_machine.get(key).await
    }

    /// Set `key` to `value` through consensus.
    ///
    /// Fails with [`StoreError::NotLeader`] on a non-leader without
    /// emitting a log entry; returns once the command has committed and
    /// applied, or [`StoreError::Timeout`] after [`RAFT_TIMEOUT`].
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) -> StoreResult<()> {
        self.submit(Command::Set {
            key: key.into(),
            value: value.into(),
        })
        .await
    }

    /// Delete `key` through consensus. Same contract as [`Store::set`];
    /// deleting an absent key still replicates and succeeds.
    pub async fn delete(&self, key: impl Into<String>) -> StoreResult<()> {
        self.submit(Command::Delete { key: key.into() }).await
    }

    /// Replicate one command and wait for it to commit and apply.
    async fn submit(&self, cmd: Command) -> StoreResult<()> {
        if !self.is_leader().await {
            return Err(StoreError::NotLeader {
                leader: self.current_leader().await,
            });
        }

        tracing::debug!(op = cmd.name(), key = cmd.key(), "submitting command");

        match tokio::time::timeout(RAFT_TIMEOUT, self.raft.client_write(cmd)).await {
            Ok(Ok(_resp)) => Ok(()),
            Ok(Err(e)) => Err(StoreError::from_write_error(e)),
            Err(_elapsed) => Err(StoreError::Timeout),
        }
    }

    /// Add the node at `addr` to the cluster as a voting member.
    ///
    /// Only succeeds on the leader. The new node is first added as a
    /// learner and caught up, then promoted to voter; the call returns once
    /// the membership change has committed.
    pub async fn join(&self, node_id: NodeId, addr: impl Into<String>) -> StoreResult<()> {
        let addr = addr.into();

        if !self.is_leader().await {
            return Err(StoreError::NotLeader {
                leader: self.current_leader().await,
            });
        }

        tracing::info!(node_id, %addr, "received join request for remote node");

        let node = BasicNode { addr: addr.clone() };
        match tokio::time::timeout(RAFT_TIMEOUT, self.raft.add_learner(node_id, node, true)).await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(StoreError::from_write_error(e)),
            Err(_elapsed) => return Err(StoreError::Timeout),
        }

        let metrics = self.raft.metrics().borrow().clone();
        let mut voters: BTreeSet<NodeId> = metrics.membership_config.voter_ids().collect();
        voters.insert(node_id);

        match tokio::time::timeout(RAFT_TIMEOUT, self.raft.change_membership(voters, false)).await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(StoreError::from_write_error(e)),
            Err(_elapsed) => return Err(StoreError::Timeout),
        }

        tracing::info!(node_id, %addr, "node joined successfully");
        Ok(())
    }

    /// This node's ID.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The current leader's node ID, if one is known.
    pub async fn current_leader(&self) -> Option<NodeId> {
        self.raft.current_leader().await
    }

    /// Whether this node is currently the leader.
    pub async fn is_leader(&self) -> bool {
        self.raft.current_leader().await == Some(self.node_id)
    }

    /// The node's current consensus role.
    pub fn role(&self) -> Role {
        match self.raft.metrics().borrow().state {
            ServerState::Leader => Role::Leader,
            ServerState::Candidate => Role::Candidate,
            _ => Role::Follower,
        }
    }

    /// The state machine, for read-only queries beyond single gets.
    pub fn state_machine(&self) -> &StoreStateMachine {
        &self.state_machine
    }

    /// Current consensus metrics.
    pub fn metrics(&self) -> openraft::RaftMetrics<NodeId, BasicNode> {
        self.raft.metrics().borrow().clone()
    }

    /// Ask the engine to take a snapshot now instead of waiting for the
    /// snapshot policy.
    pub async fn trigger_snapshot(&self) -> StoreResult<()> {
        self.raft
            .trigger()
            .snapshot()
            .await
            .map_err(|e| StoreError::Raft(e.to_string()))?;
        Ok(())
    }

    /// Shut the node down gracefully: stop the consensus engine and close
    /// the transport.
    pub async fn shutdown(&mut self) -> StoreResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        self.raft
            .shutdown()
            .await
            .map_err(|e| StoreError::Raft(format!("shutdown: {:?}", e)))?;

        tracing::info!(node_id = self.node_id, "store shut down");
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
