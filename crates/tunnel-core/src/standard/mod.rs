//! Outbound tunnels: this process is the SSH client.
//!
//! A standard tunnel holds one SSH session to a remote host and exposes a
//! local port; every accepted connection becomes a `direct-tcpip` channel to
//! the configured service.

mod client;
mod keepalive;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use russh::Disconnect;
use ssh_core::forwarding::ForwardSession;
use tb_types::{StandardTunnelConfig, TunnelKind};
use tokio::{net::TcpListener, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use self::client::{TunnelClientHandler, TunnelSession};
use crate::{
    config::TunnelOptions,
    error::{TunnelError, TunnelResult},
    forwarder::{ConnectionContext, forward_connection},
    lifecycle::SharedLifecycle,
    services::KeySource,
    stats::{Stats, tags},
};

pub struct StandardTunnel {
    config: StandardTunnelConfig,
    options: TunnelOptions,
    keys: KeySource,
    lifecycle: SharedLifecycle,
    stats: Stats,
}

impl StandardTunnel {
    pub fn new(
        config: StandardTunnelConfig,
        options: TunnelOptions,
        keys: KeySource,
        lifecycle: SharedLifecycle,
        stats: &Stats,
    ) -> Self {
        let stats = stats
            .with_prefix("tunnel")
            .with_tag("tunnel_id", config.id)
            .with_tag("tunnel_type", TunnelKind::Standard);
        Self {
            config,
            options,
            keys,
            lifecycle,
            stats,
        }
    }

    pub fn config(&self) -> &StandardTunnelConfig {
        &self.config
    }

    /// Run until cancelled (`Ok`) or until the session or listener dies.
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
        let cfg = &self.config;
        let opts = &self.options;

        let keys = self
            .keys
            .private_keys(cfg.id)
            .await
            .map_err(|err| TunnelError::boot("load_keys", err))?;
        self.lifecycle.boot_event("load_keys", &tags([("count", keys.len())]));

        let user = cfg.ssh_user_or(&opts.default_user).to_string();
        let connecting = client::connect(
            client::build_client_config(opts.keepalive_interval, opts.keepalive_timeout),
            &cfg.ssh_host,
            cfg.ssh_port,
            &user,
            keys,
            opts.dial_timeout,
        );
        let session = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = connecting => res.map_err(|err| TunnelError::boot("ssh_connect", err))?,
        };
        let session = Arc::new(session);
        self.lifecycle.boot_event(
            "ssh_connect",
            &tags([("ssh_host", cfg.ssh_host.clone()), ("ssh_user", user.clone())]),
        );

        let bind_addr = format!("{}:{}", opts.bind_host, cfg.tunnel_port);
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                disconnect(&session).await;
                return Err(TunnelError::boot(
                    "listen",
                    TunnelError::Bind {
                        address: bind_addr,
                        source,
                    },
                ));
            }
        };
        self.lifecycle.boot_event("listen", &tags([("address", bind_addr.clone())]));
        self.lifecycle.open();
        info!(tunnel_id = %cfg.id, address = %bind_addr, service = %format!("{}:{}", cfg.service_host, cfg.service_port), "standard tunnel listening");

        let result = self.serve(&listener, session.clone(), cancel).await;

        self.lifecycle.close();
        drop(listener);
        disconnect(&session).await;
        result
    }

    async fn serve(&self, listener: &TcpListener, session: Arc<TunnelSession>, cancel: &CancellationToken) -> TunnelResult<()> {
        let cfg = &self.config;
        let opts = &self.options;
        let conn_cancel = cancel.child_token();
        let ctx = ConnectionContext::new(cfg.id, self.lifecycle.clone(), self.stats.clone());

        let poll = opts.keepalive_interval.min(opts.keepalive_timeout).max(Duration::from_millis(50));
        let keepalive = keepalive::watch(&*session, poll);
        tokio::pin!(keepalive);
        let mut stats_tick = tokio::time::interval(opts.stats_interval);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let forward: Arc<dyn ForwardSession> = session.clone();
        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                err = &mut keepalive => break Err(err),
                _ = stats_tick.tick() => {
                    self.stats.gauge("active_connections", ctx.active_connections() as f64);
                }
                accepted = listener.accept() => {
                    let (conn, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => break Err(TunnelError::Listener(err)),
                    };
                    self.spawn_connection(&ctx, &forward, conn, peer, &conn_cancel);
                }
            }
        };
        conn_cancel.cancel();
        result
    }

    fn spawn_connection(
        &self,
        ctx: &ConnectionContext,
        forward: &Arc<dyn ForwardSession>,
        conn: tokio::net::TcpStream,
        peer: SocketAddr,
        cancel: &CancellationToken,
    ) {
        debug!(tunnel_id = %self.config.id, %peer, "accepted connection");
        let ctx = ctx.clone();
        let forward = forward.clone();
        let cancel = cancel.clone();
        let service_host = self.config.service_host.clone();
        let service_port = self.config.service_port;
        tokio::spawn(async move {
            let serve = forward_connection(ctx, conn, peer, move || async move {
                forward
                    .open_direct_tcpip(service_host, service_port, peer.ip().to_string(), peer.port())
                    .await
                    .map_err(TunnelError::from)
            });
            tokio::select! {
                _ = cancel.cancelled() => debug!(%peer, "connection cancelled with tunnel"),
                _ = serve => {}
            }
        });
    }
}

async fn disconnect(session: &TunnelSession) {
    if session.is_closed() {
        return;
    }
    if let Err(err) = session.disconnect(Disconnect::ByApplication, "tunnel stopped", "").await {
        warn!(?err, "failed to close ssh session");
    }
}
