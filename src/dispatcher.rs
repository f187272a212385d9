use crate::brain::{BrainClient, BrainRegistry};
use crate::cell_state::CellStateClient;
use crate::error::{DispatchError, RegistryError};
use crate::types::*;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Hands validated work to brains.
#[async_trait]
pub trait AuctionRunner: Send + Sync {
    async fn schedule_lrps(&self, lrps: Vec<LrpStartRequest>) -> Result<DispatchReceipt, DispatchError>;
    async fn schedule_task(&self, task: TaskStartRequest) -> Result<DispatchReceipt, DispatchError>;
}

/// What was queued and where it went. Placement has not happened yet.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReceipt {
    pub brain: Option<String>,
    pub items: usize,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            workers: 1000,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<BrainRegistry>,
    brains: Arc<dyn BrainClient>,
    cells: Arc<dyn CellStateClient>,
    pool: Arc<Semaphore>,
    settings: DispatchSettings,
    in_flight: Arc<AtomicUsize>,
    shutdown_tx: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<BrainRegistry>,
        brains: Arc<dyn BrainClient>,
        cells: Arc<dyn CellStateClient>,
        settings: DispatchSettings,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            brains,
            cells,
            pool: Arc::new(Semaphore::new(settings.workers.max(1))),
            settings,
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    pub fn registry(&self) -> &Arc<BrainRegistry> {
        &self.registry
    }

    /// Submissions queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stops taking permits and abandons queued and running submissions.
    pub fn shutdown(&self) {
        self.pool.close();
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Picks the brain for a batch: the first item tag with a registered
    /// brain wins, otherwise the default brain.
    pub async fn resolve_brain<'a, I>(&self, tags: I) -> Result<Arc<Brain>, RegistryError>
    where
        I: IntoIterator<Item = &'a Tag>,
    {
        for tag in tags {
            if let Some(brain) = self.registry.get(tag) {
                return Ok(brain);
            }
        }
        self.registry.lookup(DEFAULT_TAG).await
    }

    /// Queues `request` for `brain` on the worker pool and returns immediately.
    pub fn submit(&self, brain: Arc<Brain>, request: AuctionRequest) -> JoinHandle<Result<(), DispatchError>> {
        let submission = Submission {
            brains: self.brains.clone(),
            cells: self.cells.clone(),
            pool: self.pool.clone(),
            settings: self.settings.clone(),
        };
        let guard = InFlight::enter(self.in_flight.clone());
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                result = submission.run(&brain, request) => result,
                true = async { shutdown_rx.wait_for(|stopped| *stopped).await.is_ok() } => {
                    warn!("Abandoning auction for brain {} on shutdown", brain.name);
                    Err(DispatchError::ShuttingDown)
                }
            }
        })
    }

    fn ensure_running(&self) -> Result<(), DispatchError> {
        if self.is_shut_down() {
            return Err(DispatchError::ShuttingDown);
        }
        Ok(())
    }
}

#[async_trait]
impl AuctionRunner for Dispatcher {
    async fn schedule_lrps(&self, lrps: Vec<LrpStartRequest>) -> Result<DispatchReceipt, DispatchError> {
        self.ensure_running()?;
        if lrps.is_empty() {
            debug!("Empty LRP batch, nothing to dispatch");
            return Ok(DispatchReceipt { brain: None, items: 0 });
        }

        let tags: Vec<Tag> = lrps.iter().flat_map(|lrp| lrp.brain_tags()).collect();
        let brain = self.resolve_brain(&tags).await?;
        let items = lrps.len();

        info!("Scheduling {} LRP starts on brain {}", items, brain.name);
        let request = AuctionRequest {
            lrps,
            ..Default::default()
        };
        self.submit(brain.clone(), request);

        Ok(DispatchReceipt {
            brain: Some(brain.name.clone()),
            items,
        })
    }

    async fn schedule_task(&self, task: TaskStartRequest) -> Result<DispatchReceipt, DispatchError> {
        self.ensure_running()?;
        let tags = task.brain_tags();
        let brain = self.resolve_brain(&tags).await?;

        info!("Scheduling task {} on brain {}", task.task_guid, brain.name);
        let request = AuctionRequest {
            tasks: vec![task],
            ..Default::default()
        };
        self.submit(brain.clone(), request);

        Ok(DispatchReceipt {
            brain: Some(brain.name.clone()),
            items: 1,
        })
    }
}

struct Submission {
    brains: Arc<dyn BrainClient>,
    cells: Arc<dyn CellStateClient>,
    pool: Arc<Semaphore>,
    settings: DispatchSettings,
}

impl Submission {
    async fn run(self, brain: &Brain, mut request: AuctionRequest) -> Result<(), DispatchError> {
        let _permit = Arc::clone(&self.pool)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::ShuttingDown)?;

        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(brain, &mut request).await {
                Ok(()) => {
                    info!(
                        "Brain {} accepted auction ({} lrps, {} tasks) on attempt {}",
                        brain.name,
                        request.lrps.len(),
                        request.tasks.len(),
                        attempt
                    );
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "Auction for brain {} failed on attempt {}/{}: {}",
                        brain.name, attempt, max_attempts, e
                    );
                    tokio::time::sleep(self.settings.retry_backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("Auction for brain {} failed: {}", brain.name, e);
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&self, brain: &Brain, request: &mut AuctionRequest) -> Result<(), DispatchError> {
        request.cells = self.cells.fetch_cells().await?;
        self.brains.submit(brain, request).await
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
