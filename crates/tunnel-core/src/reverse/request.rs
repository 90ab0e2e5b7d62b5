//! Admitted `tcpip-forward` requests handed from the SSH server to a tunnel.

use std::{fmt, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use russh::server;
use ssh_core::forwarding::ForwardStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::error::{TunnelError, TunnelResult};

/// Origin reported on `forwarded-tcpip` channels; agents never see end-user addresses.
const ORIGIN_HOST: &str = "127.0.0.1";
const ORIGIN_PORT: u32 = 0;

/// Opens a channel back to the agent that requested the forward.
#[async_trait]
pub trait ForwardDialer: Send + Sync {
    async fn dial(&self) -> TunnelResult<ForwardStream>;
}

/// Dials `forwarded-tcpip` channels over a live server-side SSH session.
pub(crate) struct SessionDialer {
    pub handle: server::Handle,
    pub address: String,
    pub port: u32,
}

#[async_trait]
impl ForwardDialer for SessionDialer {
    async fn dial(&self) -> TunnelResult<ForwardStream> {
        let channel = self
            .handle
            .channel_open_forwarded_tcpip(self.address.clone(), self.port, ORIGIN_HOST, ORIGIN_PORT)
            .await
            .map_err(|err| TunnelError::Forward(err.to_string()))?;
        Ok(Box::new(channel.into_stream()))
    }
}

/// A validated port-forward from a connected agent.
pub struct ForwardRequest {
    pub tunnel_id: Uuid,
    pub bind_address: String,
    pub bind_port: u16,
    pub peer: Option<SocketAddr>,
    dialer: Arc<dyn ForwardDialer>,
    closed: CancellationToken,
}

impl ForwardRequest {
    pub fn new(
        tunnel_id: Uuid,
        bind_address: impl Into<String>,
        bind_port: u16,
        peer: Option<SocketAddr>,
        dialer: Arc<dyn ForwardDialer>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            tunnel_id,
            bind_address: bind_address.into(),
            bind_port,
            peer,
            dialer,
            closed,
        }
    }

    /// Open a new channel to the agent for one end-user connection.
    pub async fn dial(&self) -> TunnelResult<ForwardStream> {
        if self.is_closed() {
            return Err(TunnelError::Forward("agent connection closed".into()));
        }
        self.dialer.dial().await
    }

    /// Whether the agent's connection or forward has ended.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

impl fmt::Debug for ForwardRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardRequest")
            .field("tunnel_id", &self.tunnel_id)
            .field("bind_address", &self.bind_address)
            .field("bind_port", &self.bind_port)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
