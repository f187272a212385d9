use async_trait::async_trait;
use auctioneer::config::{CoordinatorSettings, DispatcherSettings, LockSettings, RegistrySettings};
use auctioneer::coordinator::SERVICE_LOCK_KEY;
use auctioneer::error::{CoordinatorError, LifecycleError};
use auctioneer::lifecycle::{LifecycleHandle, LockMaintainer, Member, ProcessGroup, ReadySignal, Runner};
use auctioneer::*;
use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

type Log = Arc<Mutex<Vec<String>>>;

enum Behavior {
    Serve,
    FailAfterReady,
    FailBeforeReady,
    ExitAfterReady,
    LoseLease,
}

struct Recorder {
    name: &'static str,
    log: Log,
    behavior: Behavior,
}

impl Recorder {
    fn member(name: &'static str, log: &Log, behavior: Behavior) -> Member {
        Member::new(
            name,
            Recorder {
                name,
                log: log.clone(),
                behavior,
            },
        )
    }

    fn record(&self, event: &str) {
        self.log.lock().unwrap().push(format!("{}:{}", event, self.name));
    }
}

#[async_trait]
impl Runner for Recorder {
    async fn run(self: Box<Self>, ready: ReadySignal, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        self.record("start");
        if let Behavior::FailBeforeReady = self.behavior {
            anyhow::bail!("{} could not start", self.name);
        }
        ready.notify();

        match self.behavior {
            Behavior::FailAfterReady => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                anyhow::bail!("{} crashed", self.name);
            }
            Behavior::ExitAfterReady => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                return Ok(());
            }
            Behavior::LoseLease => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                return Err(LifecycleError::LeaseLost {
                    holder_id: "a".to_string(),
                }
                .into());
            }
            _ => {}
        }

        let _ = shutdown.wait_for(|stop| *stop).await;
        self.record("stop");
        Ok(())
    }
}

fn events(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn test_group_starts_in_order_and_stops_in_reverse() {
    let log: Log = Arc::default();
    let group = ProcessGroup::ordered(vec![
        Recorder::member("lock", &log, Behavior::Serve),
        Recorder::member("registration", &log, Behavior::Serve),
        Recorder::member("server", &log, Behavior::Serve),
    ]);
    assert_eq!(group.names(), vec!["lock", "registration", "server"]);

    let (interrupt_tx, interrupt_rx) = watch::channel(false);
    let running = tokio::spawn(group.run(interrupt_rx));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(events(&log), vec!["start:lock", "start:registration", "start:server"]);

    interrupt_tx.send(true).unwrap();
    running.await.unwrap().unwrap();

    assert_eq!(
        events(&log),
        vec![
            "start:lock",
            "start:registration",
            "start:server",
            "stop:server",
            "stop:registration",
            "stop:lock",
        ]
    );
}

#[tokio::test]
async fn test_group_member_failure_tears_down() {
    let log: Log = Arc::default();
    let group = ProcessGroup::ordered(vec![
        Recorder::member("lock", &log, Behavior::Serve),
        Recorder::member("server", &log, Behavior::FailAfterReady),
        Recorder::member("last", &log, Behavior::Serve),
    ]);

    let (_interrupt_tx, interrupt_rx) = watch::channel(false);
    let err = group.run(interrupt_rx).await.unwrap_err();

    match err {
        LifecycleError::MemberFailed { name, .. } => assert_eq!(name, "server"),
        other => panic!("expected member failure, got {:?}", other),
    }
    assert_eq!(
        events(&log),
        vec!["start:lock", "start:server", "start:last", "stop:last", "stop:lock"]
    );
}

#[tokio::test]
async fn test_group_failure_before_ready_skips_later_members() {
    let log: Log = Arc::default();
    let group = ProcessGroup::ordered(vec![
        Recorder::member("lock", &log, Behavior::Serve),
        Recorder::member("server", &log, Behavior::FailBeforeReady),
        Recorder::member("never", &log, Behavior::Serve),
    ]);

    let (_interrupt_tx, interrupt_rx) = watch::channel(false);
    let err = group.run(interrupt_rx).await.unwrap_err();

    assert!(matches!(err, LifecycleError::MemberFailed { ref name, .. } if name == "server"));
    assert_eq!(events(&log), vec!["start:lock", "start:server", "stop:lock"]);
}

#[tokio::test]
async fn test_group_unexpected_exit() {
    let log: Log = Arc::default();
    let group = ProcessGroup::ordered(vec![
        Recorder::member("lock", &log, Behavior::Serve),
        Recorder::member("server", &log, Behavior::ExitAfterReady),
    ]);

    let (_interrupt_tx, interrupt_rx) = watch::channel(false);
    let err = group.run(interrupt_rx).await.unwrap_err();
    assert!(matches!(err, LifecycleError::MemberExited { ref name } if name == "server"));
}

#[tokio::test]
async fn test_group_passes_lease_loss_through() {
    let log: Log = Arc::default();
    let group = ProcessGroup::ordered(vec![
        Recorder::member("lock", &log, Behavior::LoseLease),
        Recorder::member("server", &log, Behavior::Serve),
    ]);

    let (_interrupt_tx, interrupt_rx) = watch::channel(false);
    let err = group.run(interrupt_rx).await.unwrap_err();

    assert!(matches!(err, LifecycleError::LeaseLost { ref holder_id } if holder_id == "a"));
    assert_eq!(events(&log), vec!["start:lock", "start:server", "stop:server"]);
}

async fn spawn_stub(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Stub brain plus cell-state store on one listener.
async fn spawn_cluster_stub() -> (SocketAddr, mpsc::UnboundedReceiver<AuctionRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();

    async fn auctions(
        State(tx): State<mpsc::UnboundedSender<AuctionRequest>>,
        Json(request): Json<AuctionRequest>,
    ) -> StatusCode {
        let _ = tx.send(request);
        StatusCode::ACCEPTED
    }

    async fn cells() -> Json<Vec<CellPresence>> {
        Json(vec![CellPresence {
            cell_id: "cell-z1-0".to_string(),
            rep_address: "http://cell-z1-0:1800".to_string(),
            zone: "z1".to_string(),
        }])
    }

    let router = Router::new()
        .route("/v1/auctions", post(auctions))
        .route("/v1/cells", get(cells))
        .with_state(tx);

    (spawn_stub(router).await, rx)
}

fn config(holder: &str, cluster_state_url: String) -> AuctioneerConfig {
    AuctioneerConfig {
        holder_id: Some(holder.to_string()),
        advertise_host: Some("127.0.0.1".to_string()),
        listen_addr: "127.0.0.1:0".to_string(),
        registration_addr: "127.0.0.1:0".to_string(),
        control_addr: "127.0.0.1:0".to_string(),
        max_body_bytes: 4 * 1024 * 1024,
        cluster_state_url,
        communication_timeout_ms: 1000,
        cell_state_timeout_ms: 500,
        dispatcher: DispatcherSettings {
            workers: 8,
            max_attempts: 2,
            retry_backoff_ms: 10,
        },
        registry: RegistrySettings { ready_timeout_ms: 500 },
        lock: LockSettings {
            ttl_ms: 600,
            retry_interval_ms: 200,
        },
        coordinator: CoordinatorSettings::Local,
    }
}

fn start(auctioneer: &Arc<Auctioneer>) -> tokio::task::JoinHandle<Result<(), LifecycleError>> {
    let auctioneer = auctioneer.clone();
    tokio::spawn(async move { auctioneer.run().await })
}

async fn wait_state(auctioneer: &Auctioneer, state: LifecycleState, within: Duration) {
    let reached = auctioneer.state().wait_for(within, |s| s == state).await;
    assert_eq!(
        reached,
        Some(state),
        "{} did not reach {:?}, currently {:?}",
        auctioneer.holder_id(),
        state,
        auctioneer.state().current()
    );
}

#[tokio::test]
async fn test_only_lease_holder_serves() {
    let (stub, _rx) = spawn_cluster_stub().await;
    let coordinator = Arc::new(MemoryCoordinator::new());
    let a = Arc::new(Auctioneer::with_coordinator(config("a", format!("http://{}", stub)), coordinator.clone()).unwrap());
    let b = Arc::new(Auctioneer::with_coordinator(config("b", format!("http://{}", stub)), coordinator.clone()).unwrap());

    let run_a = start(&a);
    wait_state(&a, LifecycleState::Active, Duration::from_secs(2)).await;
    let run_b = start(&b);
    wait_state(&b, LifecycleState::AcquiringLock, Duration::from_secs(2)).await;

    assert!(a.intake_addr().wait(Duration::from_secs(2)).await.is_some());
    assert!(a.registration_addr().get().is_some());

    // Renewals keep the lease well past its TTL.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(a.state().current(), LifecycleState::Active);
    assert_eq!(b.state().current(), LifecycleState::AcquiringLock);
    assert_eq!(coordinator.holder(SERVICE_LOCK_KEY).unwrap().holder_id, "a");
    assert!(b.intake_addr().get().is_none());
    assert!(b.registration_addr().get().is_none());

    a.shutdown();
    b.shutdown();
    run_a.await.unwrap().unwrap();
    run_b.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_lease_loss_hands_over_within_retry_interval() {
    let (stub, _rx) = spawn_cluster_stub().await;
    let coordinator = Arc::new(MemoryCoordinator::new());
    let a = Arc::new(Auctioneer::with_coordinator(config("a", format!("http://{}", stub)), coordinator.clone()).unwrap());
    let b = Arc::new(Auctioneer::with_coordinator(config("b", format!("http://{}", stub)), coordinator.clone()).unwrap());

    let run_a = start(&a);
    wait_state(&a, LifecycleState::Active, Duration::from_secs(2)).await;
    let run_b = start(&b);
    wait_state(&b, LifecycleState::AcquiringLock, Duration::from_secs(2)).await;

    coordinator.revoke(SERVICE_LOCK_KEY);

    let err = tokio::time::timeout(Duration::from_secs(2), run_a)
        .await
        .expect("active instance did not stop after losing the lease")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, LifecycleError::LeaseLost { ref holder_id } if holder_id == "a"));
    assert_eq!(a.state().current(), LifecycleState::Terminated);
    assert!(a.intake_addr().get().is_none());

    // One retry interval plus scheduling slack.
    wait_state(&b, LifecycleState::Active, Duration::from_millis(400)).await;
    assert_eq!(coordinator.holder(SERVICE_LOCK_KEY).unwrap().holder_id, "b");
    assert!(b.intake_addr().wait(Duration::from_secs(1)).await.is_some());

    b.shutdown();
    run_b.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_releases_lease() {
    let (stub, _rx) = spawn_cluster_stub().await;
    let coordinator = Arc::new(MemoryCoordinator::new());
    let a = Arc::new(Auctioneer::with_coordinator(config("a", format!("http://{}", stub)), coordinator.clone()).unwrap());

    let run_a = start(&a);
    wait_state(&a, LifecycleState::Active, Duration::from_secs(2)).await;
    assert!(a.intake_addr().wait(Duration::from_secs(1)).await.is_some());

    a.shutdown();
    run_a.await.unwrap().unwrap();

    assert_eq!(a.state().current(), LifecycleState::Terminated);
    assert!(coordinator.holder(SERVICE_LOCK_KEY).is_none());
    assert!(a.intake_addr().get().is_none());
    assert!(a.registration_addr().get().is_none());
}

#[tokio::test]
async fn test_shutdown_while_waiting_for_lock() {
    let (stub, _rx) = spawn_cluster_stub().await;
    let coordinator = Arc::new(MemoryCoordinator::new());
    let a = Arc::new(Auctioneer::with_coordinator(config("a", format!("http://{}", stub)), coordinator.clone()).unwrap());
    let b = Arc::new(Auctioneer::with_coordinator(config("b", format!("http://{}", stub)), coordinator.clone()).unwrap());

    let run_a = start(&a);
    wait_state(&a, LifecycleState::Active, Duration::from_secs(2)).await;
    let run_b = start(&b);
    wait_state(&b, LifecycleState::AcquiringLock, Duration::from_secs(2)).await;

    b.shutdown();
    run_b.await.unwrap().unwrap();
    assert_eq!(b.state().current(), LifecycleState::Terminated);
    assert_eq!(coordinator.holder(SERVICE_LOCK_KEY).unwrap().holder_id, "a");

    a.shutdown();
    run_a.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_registered_brain_receives_auction() {
    let (stub, mut auctions) = spawn_cluster_stub().await;
    let coordinator = Arc::new(MemoryCoordinator::new());
    let a = Arc::new(Auctioneer::with_coordinator(config("a", format!("http://{}", stub)), coordinator).unwrap());

    let run_a = start(&a);
    wait_state(&a, LifecycleState::Active, Duration::from_secs(2)).await;
    let intake = a.intake_addr().wait(Duration::from_secs(1)).await.unwrap();
    let registration = a.registration_addr().get().unwrap();

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/v1/brains", registration))
        .json(&serde_json::json!({
            "name": "b1",
            "url": format!("http://{}", stub),
            "tags": "default",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let response = client
        .post(format!("http://{}/v1/lrps", intake))
        .json(&serde_json::json!([{
            "process_guid": "pg-1",
            "domain": "cf-apps",
            "indices": [0],
            "resource": {"memory_mb": 256, "disk_mb": 1024, "root_fs": ""}
        }]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    let request = tokio::time::timeout(Duration::from_secs(2), auctions.recv())
        .await
        .expect("brain never received the auction")
        .unwrap();
    assert_eq!(request.lrps.len(), 1);
    assert_eq!(request.lrps[0].process_guid, "pg-1");
    assert_eq!(request.cells.len(), 1);

    drop(client);
    a.shutdown();
    run_a.await.unwrap().unwrap();
}

enum Renewal {
    Rejected,
    Hangs,
}

/// Grants the lock normally but misbehaves on renew, and never reports the
/// lease as lost on its own.
struct FlakyRenewals {
    inner: MemoryCoordinator,
    renewal: Renewal,
}

impl FlakyRenewals {
    fn new(renewal: Renewal) -> Self {
        Self {
            inner: MemoryCoordinator::new(),
            renewal,
        }
    }
}

#[async_trait]
impl Coordinator for FlakyRenewals {
    async fn acquire(&self, key: &str, lease: &LockLease) -> Result<LockRecord, CoordinatorError> {
        self.inner.acquire(key, lease).await
    }

    async fn renew(&self, key: &str, lease: &LockLease) -> Result<LockRecord, CoordinatorError> {
        match self.renewal {
            Renewal::Rejected => Err(CoordinatorError::NotHeld {
                key: key.to_string(),
                holder: lease.holder_id.clone(),
            }),
            Renewal::Hangs => std::future::pending().await,
        }
    }

    async fn release(&self, key: &str, lease: &LockLease) -> Result<(), CoordinatorError> {
        self.inner.release(key, lease).await
    }

    async fn lease_lost(&self, _key: &str, _lease: &LockLease) {
        std::future::pending::<()>().await
    }
}

async fn run_maintainer(renewal: Renewal, ttl: Duration) -> (Result<(), LifecycleError>, LifecycleHandle, Duration) {
    let state = LifecycleHandle::new();
    let maintainer = LockMaintainer::new(
        Arc::new(FlakyRenewals::new(renewal)),
        SERVICE_LOCK_KEY,
        LockLease::new("a", "http://a:9016", ttl),
        Duration::from_millis(100),
        state.clone(),
    );
    let group = ProcessGroup::ordered(vec![Member::new("lock-maintainer", maintainer)]);

    let (_interrupt_tx, interrupt_rx) = watch::channel(false);
    let started = Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(3), group.run(interrupt_rx))
        .await
        .expect("lock maintainer kept running after its lease ran out");
    (result, state, started.elapsed())
}

#[tokio::test]
async fn test_rejected_renewal_is_lease_loss() {
    let (result, state, _) = run_maintainer(Renewal::Rejected, Duration::from_millis(300)).await;

    let err = result.unwrap_err();
    assert!(matches!(err, LifecycleError::LeaseLost { ref holder_id } if holder_id == "a"));
    assert_eq!(state.current(), LifecycleState::LockLost);
}

#[tokio::test]
async fn test_hung_renewal_is_lease_loss_within_ttl() {
    let ttl = Duration::from_millis(300);
    let (result, state, elapsed) = run_maintainer(Renewal::Hangs, ttl).await;

    let err = result.unwrap_err();
    assert!(matches!(err, LifecycleError::LeaseLost { ref holder_id } if holder_id == "a"));
    assert_eq!(state.current(), LifecycleState::LockLost);
    // Lease granted at start, so the loss lands at the ttl plus slack.
    assert!(elapsed >= ttl, "gave up after {:?}", elapsed);
    assert!(elapsed < ttl * 3, "gave up after {:?}", elapsed);
}

#[tokio::test]
async fn test_rejected_renewal_terminates_instance() {
    let (stub, _rx) = spawn_cluster_stub().await;
    let a = Arc::new(
        Auctioneer::with_coordinator(
            config("a", format!("http://{}", stub)),
            Arc::new(FlakyRenewals::new(Renewal::Rejected)),
        )
        .unwrap(),
    );

    let run_a = start(&a);
    wait_state(&a, LifecycleState::Active, Duration::from_secs(2)).await;

    let err = tokio::time::timeout(Duration::from_secs(2), run_a)
        .await
        .expect("instance kept running after its renewal was rejected")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, LifecycleError::LeaseLost { ref holder_id } if holder_id == "a"));
    assert_eq!(a.state().current(), LifecycleState::Terminated);
    assert!(a.intake_addr().get().is_none());
    assert!(a.registration_addr().get().is_none());
}
