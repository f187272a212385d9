use crate::coordinator::lease_table::{LockCommand, LockResponse, SharedLeases};
use crate::coordinator::{response_to_record, Coordinator};
use crate::error::CoordinatorError;
use crate::types::*;
use async_trait::async_trait;
use tracing::warn;

/// In-process lease table. Instances sharing one `MemoryCoordinator`
/// contend for the same locks, which is what single-node deployments and
/// tests need.
#[derive(Clone, Default)]
pub struct MemoryCoordinator {
    leases: SharedLeases,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self, key: &str) -> Option<LockRecord> {
        self.leases.holder(key)
    }

    /// Drops whoever holds `key`, as an operator or a failed session would.
    pub fn revoke(&self, key: &str) {
        warn!("Revoking lock {}", key);
        self.leases.apply(&LockCommand::Revoke {
            key: key.to_string(),
        });
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn acquire(&self, key: &str, lease: &LockLease) -> Result<LockRecord, CoordinatorError> {
        let response = self.leases.apply(&LockCommand::acquire(key, lease));
        response_to_record(key, lease, response)
    }

    async fn renew(&self, key: &str, lease: &LockLease) -> Result<LockRecord, CoordinatorError> {
        let response = self.leases.apply(&LockCommand::renew(key, lease));
        response_to_record(key, lease, response)
    }

    async fn release(&self, key: &str, lease: &LockLease) -> Result<(), CoordinatorError> {
        match self.leases.apply(&LockCommand::release(key, lease)) {
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
