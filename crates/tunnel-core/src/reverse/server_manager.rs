//! russh `Server` factory for the shared reverse server.

use std::net::SocketAddr;

use tracing::{info, warn};

use super::{
    handler::{ReverseSessionHandler, display_addr},
    registry::TunnelRegistry,
};
use crate::stats::Stats;

/// Invoked by russh whenever an agent connects.
#[derive(Clone)]
pub(crate) struct ServerManager {
    pub registry: TunnelRegistry,
    pub stats: Stats,
}

impl russh::server::Server for ServerManager {
    type Handler = ReverseSessionHandler;

    fn new_client(&mut self, addr: Option<SocketAddr>) -> Self::Handler {
        info!(peer = %display_addr(addr), "agent connected");
        self.stats.incr("connection_requests");
        ReverseSessionHandler::new(addr, self.registry.clone(), self.stats.clone())
    }

    fn handle_session_error(&mut self, error: <Self::Handler as russh::server::Handler>::Error) {
        warn!(?error, "agent session ended with error");
    }
}
