//! The shared inbound SSH server every reverse tunnel registers into.

use std::{sync::Arc, time::Duration};

use russh::{
    MethodKind, MethodSet,
    keys::PrivateKey,
    server::{self as ssh_server, Server as _},
};
use ssh_core::crypto::default_preferred;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{registry::TunnelRegistry, server_manager::ServerManager};
use crate::{
    config::ReverseServerOptions,
    error::{TunnelError, TunnelResult},
    stats::Stats,
};

pub struct ReverseServer {
    config: Arc<ssh_server::Config>,
    registry: TunnelRegistry,
    stats: Stats,
    bind_address: String,
}

impl ReverseServer {
    /// Only public-key authentication is offered.
    pub fn new(host_key: PrivateKey, options: &ReverseServerOptions, stats: &Stats) -> Self {
        let mut config = ssh_server::Config {
            preferred: default_preferred(),
            auth_rejection_time: options.auth_rejection_time,
            auth_rejection_time_initial: Some(Duration::from_millis(0)),
            nodelay: true,
            ..Default::default()
        };
        config.methods = MethodSet::empty();
        config.methods.push(MethodKind::PublicKey);
        config.keys.push(host_key);

        Self {
            config: Arc::new(config),
            registry: TunnelRegistry::new(),
            stats: stats.with_prefix("sshd"),
            bind_address: format!("{}:{}", options.bind_host, options.port),
        }
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }

    pub async fn bind(&self) -> TunnelResult<TcpListener> {
        TcpListener::bind(&self.bind_address)
            .await
            .map_err(|source| TunnelError::Bind {
                address: self.bind_address.clone(),
                source,
            })
    }

    /// Bind the configured address and serve until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> TunnelResult<()> {
        let listener = self.bind().await?;
        self.serve(listener, cancel).await
    }

    /// Accept agents on `listener` until cancelled. Per-connection failures are logged only.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> TunnelResult<()> {
        let local = listener.local_addr()?;
        info!(address = %local, "reverse tunnel server listening");
        let mut server = ServerManager {
            registry: self.registry.clone(),
            stats: self.stats.clone(),
        };

        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(address = %local, "reverse tunnel server stopping");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(?err, "failed to accept agent connection");
                        continue;
                    }
                },
            };
            let handler = server.new_client(Some(peer));
            let config = self.config.clone();
            let cancel = cancel.clone();
            let mut errors = server.clone();
            tokio::spawn(async move {
                let _ = stream.set_nodelay(true);
                let session = match ssh_server::run_stream(config, stream, handler).await {
                    Ok(session) => session,
                    Err(err) => {
                        warn!(%peer, ?err, "agent ssh handshake failed");
                        return;
                    }
                };
                tokio::select! {
                    _ = cancel.cancelled() => debug!(%peer, "dropping agent session on shutdown"),
                    res = session => if let Err(err) = res {
                        errors.handle_session_error(err);
                    },
                }
            });
        }
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }
}

impl std::fmt::Debug for ReverseServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverseServer")
            .field("bind_address", &self.bind_address)
            .field("tunnels", &self.registry.len())
            .finish()
    }
}
