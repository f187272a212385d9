use crate::types::*;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

/// Mutation of the lease table. Every command carries the proposer's clock
/// so that applying it is deterministic on every replica.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LockCommand {
    Acquire {
        key: String,
        holder_id: String,
        address: String,
        ttl_ms: u64,
        now: DateTime<Utc>,
    },
    Renew {
        key: String,
        holder_id: String,
        ttl_ms: u64,
        now: DateTime<Utc>,
    },
    Release {
        key: String,
        holder_id: String,
    },
    Revoke {
        key: String,
    },
}

impl LockCommand {
    pub fn acquire(key: &str, lease: &LockLease) -> Self {
        LockCommand::Acquire {
            key: key.to_string(),
            holder_id: lease.holder_id.clone(),
            address: lease.address.clone(),
            ttl_ms: lease.ttl.as_millis() as u64,
            now: Utc::now(),
        }
    }

    pub fn renew(key: &str, lease: &LockLease) -> Self {
        LockCommand::Renew {
            key: key.to_string(),
            holder_id: lease.holder_id.clone(),
            ttl_ms: lease.ttl.as_millis() as u64,
            now: Utc::now(),
        }
    }

    pub fn release(key: &str, lease: &LockLease) -> Self {
        LockCommand::Release {
            key: key.to_string(),
            holder_id: lease.holder_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum LockResponse {
    Granted(LockRecord),
    Held(LockRecord),
    NotHeld,
    #[default]
    Ack,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LeaseTable {
    pub locks: HashMap<String, LockRecord>,
    pub last_applied_index: u64,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, command: &LockCommand) -> LockResponse {
        match command {
            LockCommand::Acquire {
                key,
                holder_id,
                address,
                ttl_ms,
                now,
            } => {
                if let Some(current) = self.locks.get(key) {
                    if &current.holder_id != holder_id && !current.is_expired_at(*now) {
                        return LockResponse::Held(current.clone());
                    }
                }
                let record = LockRecord {
                    holder_id: holder_id.clone(),
                    address: address.clone(),
                    expires_at: expiry(*now, *ttl_ms),
                };
                self.locks.insert(key.clone(), record.clone());
                LockResponse::Granted(record)
            }
            LockCommand::Renew {
                key,
                holder_id,
                ttl_ms,
                now,
            } => match self.locks.get_mut(key) {
                Some(current) if &current.holder_id == holder_id && !current.is_expired_at(*now) => {
                    current.expires_at = expiry(*now, *ttl_ms);
                    LockResponse::Granted(current.clone())
                }
                _ => LockResponse::NotHeld,
            },
            LockCommand::Release { key, holder_id } => match self.locks.get(key) {
                Some(current) if &current.holder_id == holder_id => {
                    self.locks.remove(key);
                    LockResponse::Ack
                }
                Some(_) => LockResponse::NotHeld,
                None => LockResponse::Ack,
            },
            LockCommand::Revoke { key } => {
                self.locks.remove(key);
                LockResponse::Ack
            }
        }
    }

    pub fn holder(&self, key: &str) -> Option<&LockRecord> {
        self.locks.get(key)
    }
}

fn expiry(now: DateTime<Utc>, ttl_ms: u64) -> DateTime<Utc> {
    now + ChronoDuration::milliseconds(ttl_ms.min(i64::MAX as u64) as i64)
}

/// Lease table shared between the applier and watchers. Every applied
/// command bumps a version so watchers can wait for changes.
#[derive(Clone)]
pub struct SharedLeases {
    inner: Arc<RwLock<LeaseTable>>,
    version_tx: Arc<watch::Sender<u64>>,
}

impl SharedLeases {
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(LeaseTable::new())),
            version_tx: Arc::new(version_tx),
        }
    }

    pub fn apply(&self, command: &LockCommand) -> LockResponse {
        let response = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(command);
        self.version_tx.send_modify(|v| *v += 1);
        response
    }

    pub fn holder(&self, key: &str) -> Option<LockRecord> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .holder(key)
            .cloned()
    }

    pub fn snapshot(&self) -> LeaseTable {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn restore(&self, table: LeaseTable) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = table;
        self.version_tx.send_modify(|v| *v += 1);
    }

    pub fn set_last_applied(&self, index: u64) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .last_applied_index = index;
    }

    pub fn last_applied(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_applied_index
    }

    /// Resolves once `holder_id` no longer holds `key`: the record is gone,
    /// belongs to someone else, or has expired by the local clock.
    pub async fn wait_until_lost(&self, key: &str, holder_id: &str) {
        let mut version_rx = self.version_tx.subscribe();
        loop {
            let expires_at = match self.holder(key) {
                Some(record) if record.holder_id == holder_id => record.expires_at,
                _ => return,
            };
            let now = Utc::now();
            if expires_at <= now {
                return;
            }
            let remaining = (expires_at - now).to_std().unwrap_or_default();

            tokio::select! {
                changed = version_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = tokio::time::sleep(remaining) => {}
            }
        }
    }
}

impl Default for SharedLeases {
    fn default() -> Self {
        Self::new()
    }
}
