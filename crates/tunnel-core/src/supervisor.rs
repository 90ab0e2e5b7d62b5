//! Keeps one tunnel running until told to stop.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{config::ConnCheckOptions, conncheck, discovery::Discovery, error::TunnelError, tunnel::RunTunnel};

pub struct Supervisor<T: RunTunnel> {
    tunnel: Arc<T>,
    retry_interval: Duration,
    stop: CancellationToken,
    discovery: Option<Arc<dyn Discovery>>,
    conncheck: Option<ConnCheckOptions>,
}

impl<T: RunTunnel> Supervisor<T> {
    /// `stop` is usually a child of the manager's token.
    pub fn new(tunnel: T, retry_interval: Duration, stop: CancellationToken) -> Self {
        Self {
            tunnel: Arc::new(tunnel),
            retry_interval,
            stop,
            discovery: None,
            conncheck: None,
        }
    }

    /// Register the tunnel with discovery while supervised, and probe it when `conncheck` is set.
    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>, conncheck: Option<ConnCheckOptions>) -> Self {
        self.discovery = Some(discovery);
        self.conncheck = conncheck;
        self
    }

    pub fn tunnel(&self) -> &T {
        &self.tunnel
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Idempotent. `start` returns once the in-flight tunnel run has returned.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Run the tunnel now and again one retry interval after every return,
    /// until stopped. Invocations never overlap.
    pub async fn start(&self) {
        let id = self.tunnel.id();
        let kind = self.tunnel.kind();
        let port = self.tunnel.tunnel_port();
        info!(tunnel_id = %id, tunnel_type = %kind, port, "supervisor started");

        let probe = self.register().await;

        let mut attempt: u64 = 0;
        while !self.stop.is_cancelled() {
            attempt += 1;
            let run = self.tunnel.start(self.stop.child_token());
            match AssertUnwindSafe(run).catch_unwind().await {
                Ok(Ok(())) => debug!(tunnel_id = %id, attempt, "tunnel returned"),
                Ok(Err(err)) => warn!(tunnel_id = %id, attempt, %err, "tunnel exited with error"),
                Err(_) => error!(tunnel_id = %id, attempt, err = %TunnelError::Panicked, "tunnel panicked"),
            }

            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }

        if let Some((token, task)) = probe {
            token.cancel();
            if let Err(err) = task.await {
                warn!(tunnel_id = %id, ?err, "connectivity check task failed");
            }
        }
        self.deregister().await;
        info!(tunnel_id = %id, attempts = attempt, "supervisor stopped");
    }

    async fn register(&self) -> Option<(CancellationToken, tokio::task::JoinHandle<()>)> {
        let discovery = self.discovery.as_ref()?;
        let (id, kind, port) = (self.tunnel.id(), self.tunnel.kind(), self.tunnel.tunnel_port());
        if let Err(err) = discovery.register_tunnel(id, kind, port).await {
            warn!(tunnel_id = %id, ?err, "failed to register tunnel with discovery");
        }
        let opts = self.conncheck.clone()?;
        let token = self.stop.child_token();
        let task = tokio::spawn(conncheck::run(discovery.clone(), kind, id, port, opts, token.clone()));
        Some((token, task))
    }

    async fn deregister(&self) {
        let Some(discovery) = &self.discovery else {
            return;
        };
        let id = self.tunnel.id();
        if let Err(err) = discovery.deregister_tunnel(id).await {
            warn!(tunnel_id = %id, ?err, "failed to deregister tunnel from discovery");
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
