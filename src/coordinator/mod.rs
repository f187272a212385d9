//! Leader lease coordination.
//!
//! The rest of the service only needs four operations from whatever backs
//! the lock: acquire, renew, release, and a notification that the lease is
//! gone. [`MemoryCoordinator`] keeps the table in-process; [`raft`] replicates
//! it across instances.

pub mod lease_table;
mod memory;
pub mod raft;

pub use lease_table::{LeaseTable, LockCommand, LockResponse, SharedLeases};
pub use memory::MemoryCoordinator;
pub use raft::RaftCoordinator;

use crate::error::CoordinatorError;
use crate::types::*;
use async_trait::async_trait;

/// Fixed identity under which the active instance holds its lease.
pub const SERVICE_LOCK_KEY: &str = "auctioneer";

#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Takes `key` for `lease.holder_id` if it is free, expired, or already ours.
    async fn acquire(&self, key: &str, lease: &LockLease) -> Result<LockRecord, CoordinatorError>;

    /// Extends a held lease by its TTL. Fails if the lease is no longer ours.
    async fn renew(&self, key: &str, lease: &LockLease) -> Result<LockRecord, CoordinatorError>;

    async fn release(&self, key: &str, lease: &LockLease) -> Result<(), CoordinatorError>;

    /// Resolves once `lease` is no longer held.
    async fn lease_lost(&self, key: &str, lease: &LockLease);
}

pub(crate) fn response_to_record(
    key: &str,
    lease: &LockLease,
    response: LockResponse,
) -> Result<LockRecord, CoordinatorError> {
    match response {
        LockResponse::Granted(record) => Ok(record),
        LockResponse::Held(record) => Err(CoordinatorError::Held {
            key: key.to_string(),
            holder: record.holder_id,
        }),
        LockResponse::NotHeld | LockResponse::Ack => Err(CoordinatorError::NotHeld {
            key: key.to_string(),
            holder: lease.holder_id.clone(),
        }),
    }
}
