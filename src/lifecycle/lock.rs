use crate::coordinator::Coordinator;
use crate::error::{CoordinatorError, LifecycleError};
use crate::lifecycle::group::{interrupted, ReadySignal, Runner};
use crate::lifecycle::LifecycleHandle;
use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// First member of the group. Becomes ready once the lease is held and
/// keeps it renewed; returns an error the moment it is lost.
pub struct LockMaintainer {
    coordinator: Arc<dyn Coordinator>,
    key: String,
    lease: LockLease,
    retry_interval: Duration,
    state: LifecycleHandle,
}

impl LockMaintainer {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        key: impl Into<String>,
        lease: LockLease,
        retry_interval: Duration,
        state: LifecycleHandle,
    ) -> Self {
        Self {
            coordinator,
            key: key.into(),
            lease,
            retry_interval,
            state,
        }
    }

    fn renew_interval(&self) -> Duration {
        (self.lease.ttl / 3).max(Duration::from_millis(1))
    }

    fn lost(&self) -> anyhow::Error {
        self.state.set(LifecycleState::LockLost);
        LifecycleError::LeaseLost {
            holder_id: self.lease.holder_id.clone(),
        }
        .into()
    }

    /// Returns the instant the granted lease runs out, or `None` if shutdown
    /// arrived first. The deadline counts from when the request was sent.
    async fn acquire(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Instant> {
        self.state.set(LifecycleState::AcquiringLock);
        info!(
            "Acquiring lock {} as {} ({})",
            self.key, self.lease.holder_id, self.lease.address
        );

        loop {
            let sent = Instant::now();
            match self.coordinator.acquire(&self.key, &self.lease).await {
                Ok(record) => {
                    info!("Acquired lock {} until {}", self.key, record.expires_at);
                    return Some(sent + self.lease.ttl);
                }
                Err(CoordinatorError::Held { holder, .. }) => {
                    debug!(
                        "Lock {} held by {}, retrying in {:?}",
                        self.key, holder, self.retry_interval
                    );
                }
                Err(e) => {
                    warn!("Failed to acquire lock {}: {}", self.key, e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_interval) => {}
                _ = interrupted(shutdown) => return None,
            }
        }
    }
}

#[async_trait]
impl Runner for LockMaintainer {
    async fn run(self: Box<Self>, ready: ReadySignal, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let Some(mut held_until) = self.acquire(&mut shutdown).await else {
            info!("Shutdown before lock {} was acquired", self.key);
            self.state.set(LifecycleState::ShuttingDown);
            return Ok(());
        };

        self.state.set(LifecycleState::Active);
        ready.notify();

        let mut ticker = tokio::time::interval(self.renew_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let lost = self.coordinator.lease_lost(&self.key, &self.lease);
        tokio::pin!(lost);

        loop {
            tokio::select! {
                biased;
                _ = interrupted(&mut shutdown) => {
                    self.state.set(LifecycleState::ShuttingDown);
                    match self.coordinator.release(&self.key, &self.lease).await {
                        Ok(()) => info!("Released lock {}", self.key),
                        Err(e) => warn!("Failed to release lock {}: {}", self.key, e),
                    }
                    return Ok(());
                }
                _ = &mut lost => {
                    error!("Lock {} no longer held by {}", self.key, self.lease.holder_id);
                    return Err(self.lost());
                }
                _ = ticker.tick() => {
                    // A renewal still pending when the current lease runs out
                    // counts as lost; another instance may already hold it.
                    let sent = Instant::now();
                    let renewal = tokio::time::timeout_at(
                        held_until,
                        self.coordinator.renew(&self.key, &self.lease),
                    );
                    tokio::select! {
                        biased;
                        _ = &mut lost => {
                            error!("Lock {} lost while renewing", self.key);
                            return Err(self.lost());
                        }
                        renewed = renewal => match renewed {
                            Ok(Ok(record)) => {
                                held_until = sent + self.lease.ttl;
                                debug!("Renewed lock {} until {}", self.key, record.expires_at);
                            }
                            Ok(Err(e)) => {
                                error!("Failed to renew lock {}: {}", self.key, e);
                                return Err(self.lost());
                            }
                            Err(_) => {
                                error!("Renewal of lock {} did not finish before the lease expired", self.key);
                                return Err(self.lost());
                            }
                        }
                    }
                }
            }
        }
    }
}
