//! Singleton lifecycle: `Starting → AcquiringLock → Active → (LockLost |
//! ShuttingDown) → Terminated`.

mod group;
mod lock;
mod server;

pub use group::{Member, ProcessGroup, ReadySignal, Runner};
pub use lock::LockMaintainer;
pub use server::{BoundAddr, HttpServer};

use crate::types::LifecycleState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Shared view of the current lifecycle state.
#[derive(Clone)]
pub struct LifecycleHandle {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl LifecycleHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Starting);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub fn set(&self, state: LifecycleState) {
        let previous = self.tx.send_replace(state);
        if previous != state {
            info!("Lifecycle {:?} -> {:?}", previous, state);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Waits until the state satisfies `f`, giving up after `timeout`.
    pub async fn wait_for<F>(&self, timeout: Duration, mut f: F) -> Option<LifecycleState>
    where
        F: FnMut(LifecycleState) -> bool,
    {
        let mut rx = self.subscribe();
        tokio::time::timeout(timeout, async move {
            rx.wait_for(|s| f(*s)).await.ok().map(|s| *s)
        })
        .await
        .ok()
        .flatten()
    }
}

impl Default for LifecycleHandle {
    fn default() -> Self {
        Self::new()
    }
}
