//! Periodic reachability probe for a tunnel's public endpoint.
//!
//! A tunnel that cannot reach its far side resets the client connection, so a
//! read error within the wait window means offline. Silence, a clean close or
//! bytes from a server-speaks-first service all mean online.

use std::sync::Arc;

use tb_types::{TunnelHealth, TunnelKind};
use tokio::{io::AsyncReadExt, net::TcpStream, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{config::ConnCheckOptions, discovery::Discovery};

/// Probe `host:port` once.
pub async fn check_once(host: &str, port: u16, opts: &ConnCheckOptions) -> (TunnelHealth, Option<String>) {
    let address = format!("{host}:{port}");
    let stream = match timeout(opts.dial_timeout, TcpStream::connect(&address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => return (TunnelHealth::Unhealthy, Some(format!("dial {address}: {err}"))),
        Err(_) => {
            return (
                TunnelHealth::Unhealthy,
                Some(format!("dial {address}: timed out after {:?}", opts.dial_timeout)),
            );
        }
    };

    let mut buf = Vec::with_capacity(opts.max_read);
    let mut limited = stream.take(opts.max_read.max(1) as u64);
    match timeout(opts.read_wait, limited.read_to_end(&mut buf)).await {
        Err(_) | Ok(Ok(_)) => (TunnelHealth::Healthy, None),
        Ok(Err(err)) => (TunnelHealth::Unhealthy, Some(format!("read {address}: {err}"))),
    }
}

/// Check the tunnel immediately and then every `opts.interval` until cancelled,
/// pushing each result to discovery.
pub async fn run(
    discovery: Arc<dyn Discovery>,
    kind: TunnelKind,
    id: Uuid,
    port: u16,
    opts: ConnCheckOptions,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(opts.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let host = match discovery.resolve_tunnel_host(kind, id).await {
            Ok(host) => host,
            Err(err) => {
                warn!(tunnel_id = %id, ?err, "failed to resolve tunnel host for connectivity check");
                continue;
            }
        };
        let (health, reason) = tokio::select! {
            _ = cancel.cancelled() => return,
            res = check_once(&host, port, &opts) => res,
        };
        debug!(tunnel_id = %id, %host, port, %health, reason = ?reason, "connectivity check");
        if let Err(err) = discovery.update_health(id, health, reason).await {
            warn!(tunnel_id = %id, ?err, "failed to publish tunnel health");
        }
    }
}
