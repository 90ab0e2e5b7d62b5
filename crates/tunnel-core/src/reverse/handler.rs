//! Per-connection state machine for the shared reverse SSH server.

use std::{net::SocketAddr, sync::Arc, time::Instant};

use russh::{
    Channel, Disconnect,
    keys::PublicKey,
    server::{self, Auth, Msg, Session},
};
use ssh_core::keys::fingerprint;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    registry::{AuthorizedTunnel, TunnelRegistry},
    request::{ForwardRequest, SessionDialer},
};
use crate::stats::Stats;

struct ActiveForward {
    tunnel_id: Uuid,
    port: u16,
    closed: CancellationToken,
}

pub struct ReverseSessionHandler {
    peer: Option<SocketAddr>,
    registry: TunnelRegistry,
    stats: Stats,
    /// Tunnels the last verified key may forward for.
    authorized: Vec<AuthorizedTunnel>,
    forward: Option<ActiveForward>,
    connected_at: Instant,
}

impl ReverseSessionHandler {
    pub(crate) fn new(peer: Option<SocketAddr>, registry: TunnelRegistry, stats: Stats) -> Self {
        Self {
            peer,
            registry,
            stats,
            authorized: Vec::new(),
            forward: None,
            connected_at: Instant::now(),
        }
    }

    fn reject_forward(&self, address: &str, port: u32, reason: &str) -> Result<bool, russh::Error> {
        warn!(
            remote_addr = %display_addr(self.peer),
            bind_address = address,
            bind_port = port,
            reason,
            "forwarding disabled"
        );
        Ok(false)
    }

    fn end_forward(&mut self) {
        if let Some(forward) = self.forward.take() {
            forward.closed.cancel();
        }
    }
}

impl Drop for ReverseSessionHandler {
    fn drop(&mut self) {
        let tunnel_id = self.forward.as_ref().map(|f| f.tunnel_id);
        self.end_forward();
        info!(
            remote_addr = %display_addr(self.peer),
            tunnel_id = ?tunnel_id,
            duration = ?self.connected_at.elapsed(),
            "agent disconnected"
        );
    }
}

impl server::Handler for ReverseSessionHandler {
    type Error = russh::Error;

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, Self::Error> {
        let matches = self.registry.authorized_tunnels(public_key);
        let success = !matches.is_empty();
        info!(
            remote_addr = %display_addr(self.peer),
            user,
            key_type = %public_key.algorithm(),
            fingerprint = %fingerprint(public_key),
            success,
            authorized_tunnels = ?matches.iter().map(|t| t.id).collect::<Vec<_>>(),
            "reverse tunnel authentication"
        );
        if success {
            self.authorized = matches;
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(&mut self, _channel: Channel<Msg>, _session: &mut Session) -> Result<bool, Self::Error> {
        // Agents commonly open a session alongside the forward; nothing is served on it.
        Ok(true)
    }

    async fn tcpip_forward(&mut self, address: &str, port: &mut u32, session: &mut Session) -> Result<bool, Self::Error> {
        self.stats.incr("reverse_port_forwarding_requests");

        if self.forward.is_some() {
            return self.reject_forward(address, *port, "a forward is already active on this connection");
        }
        let Ok(requested) = u16::try_from(*port) else {
            return self.reject_forward(address, *port, "port out of range");
        };
        let Some(authorized) = self.authorized.iter().find(|t| t.port == requested).copied() else {
            return self.reject_forward(address, *port, "port not authorized for key");
        };
        let Some(target) = self.registry.target_for_port(requested) else {
            return self.reject_forward(address, *port, "tunnel no longer registered");
        };
        if target.id != authorized.id {
            return self.reject_forward(address, *port, "port now belongs to another tunnel");
        }

        let handle = session.handle();
        let closed = CancellationToken::new();
        let dialer = SessionDialer {
            handle: handle.clone(),
            address: address.to_string(),
            port: *port,
        };
        let request = ForwardRequest::new(
            target.id,
            address,
            requested,
            self.peer,
            Arc::new(dialer),
            closed.clone(),
        );
        if let Err(err) = target.inbound.try_send(request) {
            debug!(tunnel_id = %target.id, ?err, "tunnel did not take forward request");
            return self.reject_forward(address, *port, "tunnel is not accepting forwards");
        }

        info!(
            remote_addr = %display_addr(self.peer),
            tunnel_id = %target.id,
            bind_address = address,
            bind_port = requested,
            "reverse forward established"
        );
        self.forward = Some(ActiveForward {
            tunnel_id: target.id,
            port: requested,
            closed: closed.clone(),
        });

        let shutdown = target.shutdown;
        let tunnel_id = target.id;
        tokio::spawn(async move {
            tokio::select! {
                _ = closed.cancelled() => {}
                _ = shutdown.cancelled() => {
                    debug!(%tunnel_id, "tunnel deregistered; disconnecting agent");
                    closed.cancel();
                    let _ = handle
                        .disconnect(Disconnect::ByApplication, "tunnel stopped".into(), "".into())
                        .await;
                }
            }
        });
        Ok(true)
    }

    async fn cancel_tcpip_forward(&mut self, address: &str, port: u32, session: &mut Session) -> Result<bool, Self::Error> {
        let matches = self.forward.as_ref().is_some_and(|f| u32::from(f.port) == port);
        if !matches {
            debug!(remote_addr = %display_addr(self.peer), bind_address = address, bind_port = port, "cancel for unknown forward");
            return Ok(false);
        }
        info!(remote_addr = %display_addr(self.peer), bind_address = address, bind_port = port, "reverse forward cancelled");
        self.end_forward();
        let handle = session.handle();
        tokio::spawn(async move {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "forward cancelled".into(), "".into())
                .await;
        });
        Ok(true)
    }
}

/// Display helper used for tracing; keeps logging concise when the socket address is unavailable.
pub(crate) fn display_addr(addr: Option<SocketAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_else(|| "<unknown>".into())
}
