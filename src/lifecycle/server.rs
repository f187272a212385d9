use crate::lifecycle::group::{interrupted, ReadySignal, Runner};
use anyhow::Context;
use async_trait::async_trait;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Where a listener ended up bound. Empty while it is not serving.
#[derive(Clone)]
pub struct BoundAddr(Arc<watch::Sender<Option<SocketAddr>>>);

impl BoundAddr {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self(Arc::new(tx))
    }

    pub fn get(&self) -> Option<SocketAddr> {
        *self.0.borrow()
    }

    fn set(&self, addr: Option<SocketAddr>) {
        self.0.send_replace(addr);
    }

    /// Waits up to `timeout` for the listener to be bound.
    pub async fn wait(&self, timeout: Duration) -> Option<SocketAddr> {
        let mut rx = self.0.subscribe();
        tokio::time::timeout(timeout, async move {
            rx.wait_for(Option::is_some).await.ok().and_then(|addr| *addr)
        })
        .await
        .ok()
        .flatten()
    }
}

impl Default for BoundAddr {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves `router` on `addr` as a group member. Ready once bound.
pub struct HttpServer {
    name: String,
    addr: String,
    router: Router,
    bound: BoundAddr,
}

impl HttpServer {
    pub fn new(name: impl Into<String>, addr: impl Into<String>, router: Router, bound: BoundAddr) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            router,
            bound,
        }
    }
}

#[async_trait]
impl Runner for HttpServer {
    async fn run(self: Box<Self>, ready: ReadySignal, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let HttpServer {
            name,
            addr,
            router,
            bound,
        } = *self;

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("{} failed to bind {}", name, addr))?;
        let local = listener.local_addr()?;
        bound.set(Some(local));
        info!("{} listening on {}", name, local);
        ready.notify();

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move { interrupted(&mut shutdown).await })
            .await;
        bound.set(None);
        served.with_context(|| format!("{} on {} failed", name, local))?;

        info!("{} on {} shut down", name, local);
        Ok(())
    }
}
