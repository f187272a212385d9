use crate::coordinator::lease_table::{LockCommand, LockResponse};
use crate::coordinator::raft::storage::{LockNode, NodeIdType, TypeConfig};
use anyhow::{anyhow, Result};
use openraft::error::{InstallSnapshotError, NetworkError, RPCError, RaftError};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use std::time::Duration;

/// Builds HTTP clients for raft peers. Peer addresses come from membership.
#[derive(Clone)]
pub struct LockNetworkFactory {
    client: reqwest::Client,
}

impl LockNetworkFactory {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Sends a write to the leader at `leader_addr` on behalf of a follower.
    pub async fn forward_write(&self, leader_addr: &str, command: &LockCommand) -> Result<LockResponse> {
        let url = format!("http://{}/raft/write", leader_addr);
        let response = self.client.post(&url).json(command).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("leader {} rejected forwarded write: {}", leader_addr, response.status()));
        }
        Ok(response.json().await?)
    }
}

pub struct LockNetwork {
    target_addr: String,
    client: reqwest::Client,
}

impl LockNetwork {
    async fn send_rpc<Req, Resp, E>(
        &self,
        path: &str,
        req: &Req,
    ) -> Result<Resp, RPCError<NodeIdType, LockNode, RaftError<NodeIdType, E>>>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
        E: std::error::Error,
    {
        let url = format!("http://{}/raft/{}", self.target_addr, path);

        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;

        if !response.status().is_success() {
            return Err(RPCError::Network(NetworkError::new(&std::io::Error::other(
                format!("HTTP error: {}", response.status()),
            ))));
        }

        response
            .json()
            .await
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))
    }
}

impl RaftNetworkFactory<TypeConfig> for LockNetworkFactory {
    type Network = LockNetwork;

    async fn new_client(&mut self, _target: NodeIdType, node: &LockNode) -> Self::Network {
        LockNetwork {
            target_addr: node.addr.clone(),
            client: self.client.clone(),
        }
    }
}

impl RaftNetwork<TypeConfig> for LockNetwork {
    async fn append_entries(
        &mut self,
        req: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeIdType>, RPCError<NodeIdType, LockNode, RaftError<NodeIdType>>>
    {
        self.send_rpc("append_entries", &req).await
    }

    async fn install_snapshot(
        &mut self,
        req: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeIdType>,
        RPCError<NodeIdType, LockNode, RaftError<NodeIdType, InstallSnapshotError>>,
    > {
        self.send_rpc("install_snapshot", &req).await
    }

    async fn vote(
        &mut self,
        req: VoteRequest<NodeIdType>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeIdType>, RPCError<NodeIdType, LockNode, RaftError<NodeIdType>>> {
        self.send_rpc("vote", &req).await
    }
}
