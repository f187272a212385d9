use crate::api::create_router;
use crate::brain::{BrainRegistry, HttpBrainClient};
use crate::cell_state::HttpCellStateClient;
use crate::config::{AuctioneerConfig, CoordinatorSettings};
use crate::coordinator::{Coordinator, MemoryCoordinator, RaftCoordinator, SERVICE_LOCK_KEY};
use crate::dispatcher::{AuctionRunner, Dispatcher};
use crate::error::LifecycleError;
use crate::lifecycle::{BoundAddr, HttpServer, LifecycleHandle, LockMaintainer, Member, ProcessGroup};
use crate::registration::create_registration_router;
use crate::types::*;
use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// One auctioneer instance: the lease-holding process group plus the state
/// it shares with the always-on control surface.
pub struct Auctioneer {
    config: AuctioneerConfig,
    lease: LockLease,
    registry: Arc<BrainRegistry>,
    dispatcher: Arc<Dispatcher>,
    coordinator: Arc<dyn Coordinator>,
    raft: Option<Arc<RaftCoordinator>>,
    state: LifecycleHandle,
    intake_addr: BoundAddr,
    registration_addr: BoundAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl Auctioneer {
    pub async fn new(config: AuctioneerConfig) -> Result<Self> {
        config.validate()?;

        let (coordinator, raft) = match &config.coordinator {
            CoordinatorSettings::Local => {
                info!("Using in-process lock coordinator");
                (Arc::new(MemoryCoordinator::new()) as Arc<dyn Coordinator>, None)
            }
            CoordinatorSettings::Raft {
                node_id,
                data_dir,
                peers,
                bootstrap,
            } => {
                std::fs::create_dir_all(data_dir)?;
                let raft = Arc::new(
                    RaftCoordinator::new(*node_id, data_dir, config.communication_timeout()).await?,
                );
                if *bootstrap {
                    raft.bootstrap(peers).await?;
                }
                (raft.clone() as Arc<dyn Coordinator>, Some(raft))
            }
        };

        Self::assemble(config, coordinator, raft)
    }

    /// Builds an instance that contends for the lease through `coordinator`.
    pub fn with_coordinator(config: AuctioneerConfig, coordinator: Arc<dyn Coordinator>) -> Result<Self> {
        config.validate()?;
        Self::assemble(config, coordinator, None)
    }

    fn assemble(
        config: AuctioneerConfig,
        coordinator: Arc<dyn Coordinator>,
        raft: Option<Arc<RaftCoordinator>>,
    ) -> Result<Self> {
        let lease = LockLease::new(
            config.effective_holder_id(),
            config.advertised_address(),
            config.lock_ttl(),
        );

        info!(
            "Initializing auctioneer holder_id={} address={}",
            lease.holder_id, lease.address
        );

        let registry = Arc::new(BrainRegistry::new(config.ready_timeout()));
        let brains = Arc::new(HttpBrainClient::new(config.communication_timeout())?);
        let cells = Arc::new(HttpCellStateClient::new(
            config.cluster_state_url.clone(),
            config.cell_state_timeout(),
        )?);
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            brains,
            cells,
            config.dispatcher.to_dispatch_settings(),
        ));

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            lease,
            registry,
            dispatcher,
            coordinator,
            raft,
            state: LifecycleHandle::new(),
            intake_addr: BoundAddr::new(),
            registration_addr: BoundAddr::new(),
            shutdown_tx,
        })
    }

    /// Lock first, then the listeners that must only run while it is held.
    pub fn process_group(&self) -> ProcessGroup {
        let runner: Arc<dyn AuctionRunner> = self.dispatcher.clone();

        ProcessGroup::ordered(vec![
            Member::new(
                "lock-maintainer",
                LockMaintainer::new(
                    self.coordinator.clone(),
                    SERVICE_LOCK_KEY,
                    self.lease.clone(),
                    self.config.lock_retry_interval(),
                    self.state.clone(),
                ),
            ),
            Member::new(
                "registration-listener",
                HttpServer::new(
                    "registration-listener",
                    self.config.registration_addr.clone(),
                    create_registration_router(self.registry.clone())
                        .layer(DefaultBodyLimit::max(self.config.max_body_bytes)),
                    self.registration_addr.clone(),
                ),
            ),
            Member::new(
                "auction-server",
                HttpServer::new(
                    "auction-server",
                    self.config.listen_addr.clone(),
                    create_router(runner).layer(DefaultBodyLimit::max(self.config.max_body_bytes)),
                    self.intake_addr.clone(),
                ),
            ),
        ])
    }

    /// Runs until shutdown or until a member fails. Only the lease holder
    /// ever reaches `Active`.
    pub async fn run(&self) -> Result<(), LifecycleError> {
        info!("Starting auctioneer {}", self.lease.holder_id);

        let result = self.process_group().run(self.shutdown_tx.subscribe()).await;
        self.dispatcher.shutdown();

        match &result {
            Ok(()) => info!("Auctioneer {} stopped", self.lease.holder_id),
            Err(e) => error!("Auctioneer {} terminated: {}", self.lease.holder_id, e),
        }
        self.state.set(LifecycleState::Terminated);
        result
    }

    pub fn shutdown(&self) {
        if matches!(
            self.state.current(),
            LifecycleState::Starting | LifecycleState::AcquiringLock | LifecycleState::Active
        ) {
            self.state.set(LifecycleState::ShuttingDown);
        }
        self.shutdown_tx.send_replace(true);
    }

    pub fn holder_id(&self) -> &str {
        &self.lease.holder_id
    }

    pub fn lease(&self) -> &LockLease {
        &self.lease
    }

    pub fn config(&self) -> &AuctioneerConfig {
        &self.config
    }

    pub fn state(&self) -> &LifecycleHandle {
        &self.state
    }

    pub fn registry(&self) -> &Arc<BrainRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn raft(&self) -> Option<&Arc<RaftCoordinator>> {
        self.raft.as_ref()
    }

    /// Bound address of the auction intake while it is serving.
    pub fn intake_addr(&self) -> &BoundAddr {
        &self.intake_addr
    }

    pub fn registration_addr(&self) -> &BoundAddr {
        &self.registration_addr
    }
}
