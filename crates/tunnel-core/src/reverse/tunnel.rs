//! A single reverse tunnel: a local port served through whichever agent
//! currently forwards for it.

use std::sync::Arc;

use tb_types::{ReverseTunnelConfig, TunnelKind};
use tokio::{net::TcpListener, sync::mpsc, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    registry::{RegisteredTunnel, TunnelRegistry},
    request::ForwardRequest,
};
use crate::{
    config::TunnelOptions,
    error::{TunnelError, TunnelResult},
    forwarder::{ConnectionContext, forward_connection},
    lifecycle::SharedLifecycle,
    services::KeySource,
    stats::{Stats, tags},
};

pub struct ReverseTunnel {
    config: ReverseTunnelConfig,
    options: TunnelOptions,
    keys: KeySource,
    registry: TunnelRegistry,
    forward_queue: usize,
    lifecycle: SharedLifecycle,
    stats: Stats,
}

impl ReverseTunnel {
    pub fn new(
        config: ReverseTunnelConfig,
        options: TunnelOptions,
        keys: KeySource,
        registry: TunnelRegistry,
        forward_queue: usize,
        lifecycle: SharedLifecycle,
        stats: &Stats,
    ) -> Self {
        let stats = stats
            .with_prefix("tunnel")
            .with_tag("tunnel_id", config.id)
            .with_tag("tunnel_type", TunnelKind::Reverse);
        Self {
            config,
            options,
            keys,
            registry,
            forward_queue: forward_queue.max(1),
            lifecycle,
            stats,
        }
    }

    pub fn config(&self) -> &ReverseTunnelConfig {
        &self.config
    }

    /// Run until cancelled (`Ok`) or until the listener fails. The tunnel is
    /// deregistered from the shared server on every exit path.
    pub async fn start(&self, cancel: CancellationToken) -> TunnelResult<()> {
        self.lifecycle.start();
        let result = self.run(&cancel).await;
        match &result {
            Err(err) if err.is_boot() => self.lifecycle.boot_error(err),
            Err(err) => self.lifecycle.error(err),
            Ok(()) => {}
        }
        self.lifecycle.stop();
        result
    }

    async fn run(&self, cancel: &CancellationToken) -> TunnelResult<()> {
        let id = self.config.id;
        let authorized_keys = self
            .keys
            .authorized_keys(id)
            .await
            .map_err(|err| TunnelError::boot("load_keys", err))?;
        self.lifecycle
            .boot_event("load_keys", &tags([("count", authorized_keys.len())]));

        let bind_addr = format!("{}:{}", self.options.bind_host, self.config.tunnel_port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|source| {
            TunnelError::boot(
                "listen",
                TunnelError::Bind {
                    address: bind_addr.clone(),
                    source,
                },
            )
        })?;
        self.lifecycle.boot_event("listen", &tags([("address", bind_addr.clone())]));

        let (inbound, requests) = mpsc::channel(self.forward_queue);
        let registration = self
            .registry
            .register(RegisteredTunnel {
                id,
                port: self.config.tunnel_port,
                authorized_keys,
                inbound,
                shutdown: CancellationToken::new(),
            })
            .map_err(|err| TunnelError::boot("register", err))?;
        self.lifecycle
            .boot_event("register", &tags([("port", self.config.tunnel_port)]));
        self.lifecycle.open();
        info!(tunnel_id = %id, address = %bind_addr, "reverse tunnel listening");

        let result = self.serve(&listener, requests, cancel).await;

        self.lifecycle.close();
        drop(registration);
        result
    }

    async fn serve(
        &self,
        listener: &TcpListener,
        mut requests: mpsc::Receiver<ForwardRequest>,
        cancel: &CancellationToken,
    ) -> TunnelResult<()> {
        let id = self.config.id;
        let conn_cancel = cancel.child_token();
        let ctx = ConnectionContext::new(id, self.lifecycle.clone(), self.stats.clone());
        let mut active: Option<Arc<ForwardRequest>> = None;
        let mut stats_tick = tokio::time::interval(self.options.stats_interval);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                request = requests.recv() => match request {
                    Some(request) => {
                        info!(tunnel_id = %id, peer = ?request.peer, "agent forwarding for tunnel");
                        active = Some(Arc::new(request));
                    }
                    None => break Err(TunnelError::Forward("tunnel registration was replaced".into())),
                },
                _ = stats_tick.tick() => {
                    self.stats.gauge("active_connections", ctx.active_connections() as f64);
                }
                accepted = listener.accept() => {
                    let (conn, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => break Err(TunnelError::Listener(err)),
                    };
                    debug!(tunnel_id = %id, %peer, "accepted connection");
                    if active.as_ref().is_some_and(|request| request.is_closed()) {
                        active = None;
                    }
                    let agent = active.clone();
                    let ctx = ctx.clone();
                    let cancel = conn_cancel.clone();
                    tokio::spawn(async move {
                        let serve = forward_connection(ctx, conn, peer, move || async move {
                            match agent {
                                Some(agent) => agent.dial().await,
                                None => Err(TunnelError::Forward("no agent connected".into())),
                            }
                        });
                        tokio::select! {
                            _ = cancel.cancelled() => debug!(%peer, "connection cancelled with tunnel"),
                            _ = serve => {}
                        }
                    });
                }
            }
        };
        conn_cancel.cancel();
        result
    }
}
