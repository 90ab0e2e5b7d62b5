//! Per-connection glue shared by both tunnel kinds: dial the far side, pump
//! bytes, report the session.

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use ssh_core::{
    forwarding::{ForwardStream, ForwardingSession},
    net,
};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{TunnelError, TunnelResult},
    lifecycle::SharedLifecycle,
    stats::{Stats, tags},
};

const CLIENT_KEEPALIVE: Duration = Duration::from_secs(30);

/// What a connection task needs from its tunnel.
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub tunnel_id: Uuid,
    pub lifecycle: SharedLifecycle,
    pub stats: Stats,
    pub active: Arc<AtomicI64>,
}

impl ConnectionContext {
    pub fn new(tunnel_id: Uuid, lifecycle: SharedLifecycle, stats: Stats) -> Self {
        Self {
            tunnel_id,
            lifecycle,
            stats,
            active: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn active_connections(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }
}

struct ActiveGuard(Arc<AtomicI64>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicI64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Serve one accepted local connection.
///
/// `dial` opens the far side. On failure the client connection is reset; on
/// success bytes are forwarded until either side finishes.
pub(crate) async fn forward_connection<F, Fut>(ctx: ConnectionContext, conn: TcpStream, peer: SocketAddr, dial: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = TunnelResult<ForwardStream>>,
{
    let _active = ActiveGuard::enter(&ctx.active);
    let session_id = Uuid::now_v7();
    ctx.lifecycle
        .session_event(session_id, "open", &tags([("peer", peer.to_string())]));

    if let Err(err) = net::set_keepalive(&conn, CLIENT_KEEPALIVE) {
        debug!(tunnel_id = %ctx.tunnel_id, %peer, ?err, "failed to enable tcp keepalive");
    }

    let upstream = match dial().await {
        Ok(stream) => stream,
        Err(err) => {
            debug!(tunnel_id = %ctx.tunnel_id, %peer, %err, "upstream dial failed; resetting client");
            net::abort(conn);
            ctx.lifecycle.session_error(session_id, &err);
            return;
        }
    };

    let session = ForwardingSession::new();
    let counters = session.counters();
    let result = session.run(conn, upstream).await;

    let rcvd = counters.a_to_b();
    let sent = counters.b_to_a();
    ctx.stats.count("bytes_rcvd", rcvd as i64);
    ctx.stats.count("bytes_sent", sent as i64);

    if let Err(err) = result {
        warn!(tunnel_id = %ctx.tunnel_id, %peer, ?err, "forwarding ended with error");
        ctx.lifecycle.session_error(session_id, &TunnelError::from(err));
    }
    ctx.lifecycle.session_event(
        session_id,
        "close",
        &tags([("bytes_rcvd", rcvd), ("bytes_sent", sent)]),
    );
}
