//! Lease table replicated with openraft.
//!
//! Every auctioneer instance is a raft member. Lease commands are raft log
//! entries; a write received by a follower is forwarded to the leader over
//! `/raft/write`. Lease expiry is judged against the timestamp embedded in
//! each command, so replicas agree on who holds the lock.

mod api;
mod network;
pub mod storage;

pub use api::create_raft_router;
pub use network::{LockNetwork, LockNetworkFactory};
pub use storage::{LockNode, NodeIdType, TypeConfig};

use crate::config::PeerConfig;
use crate::coordinator::lease_table::{LockCommand, LockResponse, SharedLeases};
use crate::coordinator::{response_to_record, Coordinator};
use crate::error::CoordinatorError;
use crate::types::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use openraft::error::{ClientWriteError, InitializeError, RaftError};
use openraft::{Config, Raft};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub type LockRaft = Raft<TypeConfig>;

pub struct RaftCoordinator {
    node_id: NodeIdType,
    raft: LockRaft,
    leases: SharedLeases,
    network: LockNetworkFactory,
}

impl RaftCoordinator {
    pub async fn new<P: AsRef<Path>>(node_id: NodeIdType, data_dir: P, rpc_timeout: Duration) -> Result<Self> {
        let config = Config {
            cluster_name: "auctioneer".to_string(),
            heartbeat_interval: 500,
            election_timeout_min: 1500,
            election_timeout_max: 3000,
            ..Default::default()
        };
        let config = Arc::new(config.validate()?);

        let leases = SharedLeases::new();
        let storage_path = data_dir.as_ref().join("raft");
        std::fs::create_dir_all(&storage_path)?;
        let (log_store, state_machine) = storage::create_storage(&storage_path, leases.clone())?;
        let network = LockNetworkFactory::new(rpc_timeout)?;

        let raft = Raft::new(node_id, config, network.clone(), log_store, state_machine).await?;

        info!("Raft node {} initialized with storage at {:?}", node_id, storage_path);

        Ok(Self {
            node_id,
            raft,
            leases,
            network,
        })
    }

    /// Seeds cluster membership with `peers`. A node that is already part of
    /// an initialized cluster ignores this.
    pub async fn bootstrap(&self, peers: &[PeerConfig]) -> Result<()> {
        let members: BTreeMap<NodeIdType, LockNode> = peers
            .iter()
            .map(|p| (p.node_id, LockNode { addr: p.addr.clone() }))
            .collect();

        match self.raft.initialize(members).await {
            Ok(()) => {
                info!("Bootstrapped raft cluster with {} members", peers.len());
                Ok(())
            }
            Err(RaftError::APIError(InitializeError::NotAllowed(_))) => {
                info!("Raft cluster already initialized, skipping bootstrap");
                Ok(())
            }
            Err(e) => Err(anyhow!("raft bootstrap failed: {}", e)),
        }
    }

    pub fn raft(&self) -> &LockRaft {
        &self.raft
    }

    pub fn node_id(&self) -> NodeIdType {
        self.node_id
    }

    pub fn leases(&self) -> &SharedLeases {
        &self.leases
    }

    pub fn is_leader(&self) -> bool {
        self.leader_id() == Some(self.node_id)
    }

    pub fn leader_id(&self) -> Option<NodeIdType> {
        self.raft.metrics().borrow().current_leader
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.raft
            .shutdown()
            .await
            .map_err(|e| anyhow!("raft shutdown failed: {}", e))
    }

    async fn write(&self, command: LockCommand) -> Result<LockResponse, CoordinatorError> {
        match self.raft.client_write(command.clone()).await {
            Ok(resp) => Ok(resp.data),
            Err(RaftError::APIError(ClientWriteError::ForwardToLeader(forward))) => {
                let leader = forward
                    .leader_node
                    .ok_or_else(|| anyhow!("no raft leader elected"))?;
                debug!("Forwarding lock write to leader at {}", leader.addr);
                Ok(self.network.forward_write(&leader.addr, &command).await?)
            }
            Err(e) => Err(anyhow!("raft write failed: {}", e).into()),
        }
    }
}

#[async_trait]
impl Coordinator for RaftCoordinator {
    async fn acquire(&self, key: &str, lease: &LockLease) -> Result<LockRecord, CoordinatorError> {
        let response = self.write(LockCommand::acquire(key, lease)).await?;
        response_to_record(key, lease, response)
    }

    async fn renew(&self, key: &str, lease: &LockLease) -> Result<LockRecord, CoordinatorError> {
        let response = self.write(LockCommand::renew(key, lease)).await?;
        response_to_record(key, lease, response)
    }

    async fn release(&self, key: &str, lease: &LockLease) -> Result<(), CoordinatorError> {
        match self.write(LockCommand::release(key, lease)).await? {
            LockResponse::NotHeld => Err(CoordinatorError::NotHeld {
                key: key.to_string(),
                holder: lease.holder_id.clone(),
            }),
            _ => Ok(()),
        }
    }

    async fn lease_lost(&self, key: &str, lease: &LockLease) {
        self.leases.wait_until_lost(key, &lease.holder_id).await
    }
}
