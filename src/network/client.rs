//! Network client implementing OpenRaft's RaftNetwork trait.

use crate::error::{RPCError, StoreError};
use crate::proto::raft_service_client::RaftServiceClient;
use crate::proto::{AppendEntriesRequest, InstallSnapshotRequest, VoteRequest};
use crate::types::{NodeId, TypeConfig};
use openraft::error::{InstallSnapshotError, NetworkError, Unreachable};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest as RaftAppendRequest, AppendEntriesResponse as RaftAppendResponse,
    InstallSnapshotRequest as RaftSnapshotRequest, InstallSnapshotResponse as RaftSnapshotResponse,
    VoteRequest as RaftVoteRequest, VoteResponse as RaftVoteResponse,
};
use openraft::BasicNode;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Channel;

/// How long a dial to a peer may take before it is abandoned.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Factory for connections to other cluster members.
///
/// Channels are cached per node; tonic multiplexes requests over one
/// connection, so a single cached channel per peer covers the engine's
/// replication, vote, and snapshot streams.
#[derive(Clone)]
pub struct NetworkClient {
    connections: Arc<RwLock<HashMap<NodeId, Channel>>>,
}

impl NetworkClient {
    /// Create a new network client.
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get or create a connection to a member.
    async fn get_connection(&self, target: NodeId, addr: &str) -> Result<Channel, StoreError> {
        {
            let connections = self.connections.read();
            if let Some(channel) = connections.get(&target) {
                return Ok(channel.clone());
            }
        }

        let endpoint = format!("http://{}", addr);
        let channel = Channel::from_shared(endpoint)
            .map_err(|e| StoreError::Config(e.to_string()))?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect()
            .await?;

        {
            let mut connections = self.connections.write();
            connections.insert(target, channel.clone());
        }

        Ok(channel)
    }
}

impl Default for NetworkClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RaftNetworkFactory<TypeConfig> for NetworkClient {
    type Network = NetworkConnection;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> Self::Network {
        NetworkConnection {
            target,
            addr: node.addr.clone(),
            client: self.clone(),
        }
    }
}

/// A connection to a specific cluster member.
pub struct NetworkConnection {
    target: NodeId,
    addr: String,
    client: NetworkClient,
}

impl RaftNetwork<TypeConfig> for NetworkConnection {
    async fn append_entries(
        &mut self,
        req: RaftAppendRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<RaftAppendResponse<NodeId>, RPCError> {
        let channel = self
            .client
            .get_connection(self.target, &self.addr)
            .await
            .map_err(|e| to_network_error(&e))?;

        let mut client = RaftServiceClient::new(channel);

        let data = serde_json::to_vec(&req)
            .map_err(|e| to_network_error(&StoreError::Serialization(e.to_string())))?;

        let response = client
            .append_entries(AppendEntriesRequest { data })
            .await
            .map_err(|e| to_unreachable_error(&e))?;

        let resp: RaftAppendResponse<NodeId> = serde_json::from_slice(&response.into_inner().data)
            .map_err(|e| to_network_error(&StoreError::Serialization(e.to_string())))?;

        Ok(resp)
    }

    async fn install_snapshot(
        &mut self,
        req: RaftSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<RaftSnapshotResponse<NodeId>, RPCError<InstallSnapshotError>> {
        let channel = self
            .client
            .get_connection(self.target, &self.addr)
            .await
            .map_err(|e| to_network_error_snapshot(&e))?;

        let mut client = RaftServiceClient::new(channel);

        let data = serde_json::to_vec(&req)
            .map_err(|e| to_network_error_snapshot(&StoreError::Serialization(e.to_string())))?;

        let response = client
            .install_snapshot(InstallSnapshotRequest { data })
            .await
            .map_err(|e| to_unreachable_error_snapshot(&e))?;

        let resp: RaftSnapshotResponse<NodeId> =
            serde_json::from_slice(&response.into_inner().data)
                .map_err(|e| to_network_error_snapshot(&StoreError::Serialization(e.to_string())))?;

        Ok(resp)
    }

    async fn vote(
        &mut self,
        req: RaftVoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<RaftVoteResponse<NodeId>, RPCError> {
        let channel = self
            .client
            .get_connection(self.target, &self.addr)
            .await
            .map_err(|e| to_network_error(&e))?;

        let mut client = RaftServiceClient::new(channel);

        let data = serde_json::to_vec(&req)
            .map_err(|e| to_network_error(&StoreError::Serialization(e.to_string())))?;

        let response = client
            .request_vote(VoteRequest { data })
            .await
            .map_err(|e| to_unreachable_error(&e))?;

        let resp: RaftVoteResponse<NodeId> = serde_json::from_slice(&response.into_inner().data)
            .map_err(|e| to_network_error(&StoreError::Serialization(e.to_string())))?;

        Ok(resp)
    }
}

fn to_network_error(err: &(impl std::error::Error + 'static)) -> RPCError {
    openraft::error::RPCError::Network(NetworkError::new(err))
}

fn to_unreachable_error(err: &tonic::Status) -> RPCError {
    openraft::error::RPCError::Unreachable(Unreachable::new(err))
}

fn to_network_error_snapshot(
    err: &(impl std::error::Error + 'static),
) -> RPCError<InstallSnapshotError> {
    openraft::error::RPCError::Network(NetworkError::new(err))
}

fn to_unreachable_error_snapshot(err: &tonic::Status) -> RPCError<InstallSnapshotError> {
    openraft::error::RPCError::Unreachable(Unreachable::new(err))
}
