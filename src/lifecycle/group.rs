use crate::error::LifecycleError;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tells the group a member finished starting up.
pub struct ReadySignal(Option<oneshot::Sender<()>>);

impl ReadySignal {
    fn new(tx: oneshot::Sender<()>) -> Self {
        Self(Some(tx))
    }

    pub fn notify(mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// A long-running member of a [`ProcessGroup`].
///
/// `run` must call [`ReadySignal::notify`] once it is serving and return
/// when `shutdown` flips to `true`. Returning at any other time tears the
/// whole group down.
#[async_trait]
pub trait Runner: Send {
    async fn run(self: Box<Self>, ready: ReadySignal, shutdown: watch::Receiver<bool>) -> anyhow::Result<()>;
}

pub struct Member {
    pub name: String,
    pub runner: Box<dyn Runner>,
}

impl Member {
    pub fn new(name: impl Into<String>, runner: impl Runner + 'static) -> Self {
        Self {
            name: name.into(),
            runner: Box::new(runner),
        }
    }
}

struct Started {
    name: String,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

type Exit = (usize, anyhow::Result<()>);

/// Members start one at a time, each after the previous one is ready, and
/// stop in reverse order. The first member to exit ends the group.
pub struct ProcessGroup {
    members: Vec<Member>,
}

impl ProcessGroup {
    pub fn ordered(members: Vec<Member>) -> Self {
        Self { members }
    }

    pub fn names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }

    /// Runs the group until a member exits or `interrupt` flips to `true`.
    ///
    /// An interrupt is a clean stop. A member exiting on its own is an error;
    /// if it returned a [`LifecycleError`] that error is passed through.
    pub async fn run(self, mut interrupt: watch::Receiver<bool>) -> Result<(), LifecycleError> {
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<Exit>();
        let mut started: Vec<Started> = Vec::with_capacity(self.members.len());
        let mut outcome: Option<Result<(), LifecycleError>> = None;

        for (index, member) in self.members.into_iter().enumerate() {
            let (stop_tx, stop_rx) = watch::channel(false);
            let (ready_tx, ready_rx) = oneshot::channel();
            let exit_tx = exit_tx.clone();
            let runner = member.runner;

            info!("Starting {}", member.name);
            let handle = tokio::spawn(async move {
                let result = runner.run(ReadySignal::new(ready_tx), stop_rx).await;
                let _ = exit_tx.send((index, result));
            });
            started.push(Started {
                name: member.name,
                stop_tx,
                handle,
            });

            tokio::select! {
                biased;
                _ = interrupted(&mut interrupt) => {
                    info!("Interrupted while starting {}", started[index].name);
                    outcome = Some(Ok(()));
                }
                Some((exited, result)) = exit_rx.recv() => {
                    outcome = Some(Err(exit_error(&started[exited].name, result)));
                }
                ready = ready_rx => match ready {
                    Ok(()) => info!("{} is ready", started[index].name),
                    // Dropped without notifying: the member returned. Its exit is in flight.
                    Err(_) => {
                        if let Some((exited, result)) = exit_rx.recv().await {
                            outcome = Some(Err(exit_error(&started[exited].name, result)));
                        }
                    }
                },
            }

            if outcome.is_some() {
                break;
            }
        }

        let mut outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                info!("Process group running with {} members", started.len());
                tokio::select! {
                    biased;
                    _ = interrupted(&mut interrupt) => {
                        info!("Process group interrupted");
                        Ok(())
                    }
                    Some((exited, result)) = exit_rx.recv() => {
                        Err(exit_error(&started[exited].name, result))
                    }
                }
            }
        };

        if let Err(e) = &outcome {
            error!("Process group stopping: {}", e);
        }

        for member in started.into_iter().rev() {
            debug!("Stopping {}", member.name);
            let _ = member.stop_tx.send(true);
            if let Err(e) = member.handle.await {
                error!("{} panicked during shutdown: {}", member.name, e);
            }
            info!("{} stopped", member.name);
        }

        drop(exit_tx);
        while let Some((exited, result)) = exit_rx.recv().await {
            let Err(e) = result else { continue };
            match e.downcast::<LifecycleError>() {
                // Lease loss outranks whatever stopped the group first.
                Ok(lost @ LifecycleError::LeaseLost { .. }) => {
                    if !matches!(outcome, Err(LifecycleError::LeaseLost { .. })) {
                        outcome = Err(lost);
                    }
                }
                Ok(other) => warn!("Member {} error during teardown: {}", exited, other),
                Err(e) => warn!("Member {} error during teardown: {:#}", exited, e),
            }
        }

        outcome
    }
}

fn exit_error(name: &str, result: anyhow::Result<()>) -> LifecycleError {
    match result {
        Ok(()) => LifecycleError::MemberExited {
            name: name.to_string(),
        },
        Err(e) => match e.downcast::<LifecycleError>() {
            Ok(lifecycle) => lifecycle,
            Err(source) => LifecycleError::MemberFailed {
                name: name.to_string(),
                source,
            },
        },
    }
}

/// Resolves once `rx` reads `true`. A dropped sender never interrupts.
pub(crate) async fn interrupted(rx: &mut watch::Receiver<bool>) {
    let stopped = rx.wait_for(|stop| *stop).await.is_ok();
    if !stopped {
        std::future::pending::<()>().await;
    }
}
