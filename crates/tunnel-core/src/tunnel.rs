//! The closed set of tunnel kinds and how the manager builds them.

use std::sync::Arc;

use async_trait::async_trait;
use tb_types::{TunnelConfig, TunnelKind};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::TunnelOptions,
    discovery::Discovery,
    error::TunnelResult,
    lifecycle::LifecycleFactory,
    reverse::{ReverseTunnel, TunnelRegistry},
    services::KeySource,
    standard::StandardTunnel,
    stats::Stats,
};

/// Anything a supervisor can keep running.
#[async_trait]
pub trait RunTunnel: Send + Sync + 'static {
    fn id(&self) -> Uuid;
    fn kind(&self) -> TunnelKind;
    fn tunnel_port(&self) -> u16;
    /// Blocks until the tunnel fails or `cancel` fires.
    async fn start(&self, cancel: CancellationToken) -> TunnelResult<()>;
}

/// Where end users connect to reach a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDetails {
    pub host: String,
    pub port: u16,
}

pub enum Tunnel {
    Standard(StandardTunnel),
    Reverse(ReverseTunnel),
}

impl Tunnel {
    pub fn config(&self) -> TunnelConfig {
        match self {
            Tunnel::Standard(t) => TunnelConfig::Standard(t.config().clone()),
            Tunnel::Reverse(t) => TunnelConfig::Reverse(t.config().clone()),
        }
    }

    pub async fn connection_details(&self, discovery: &dyn Discovery) -> TunnelResult<ConnectionDetails> {
        let host = discovery.resolve_tunnel_host(self.kind(), self.id()).await?;
        Ok(ConnectionDetails {
            host,
            port: self.tunnel_port(),
        })
    }
}

#[async_trait]
impl RunTunnel for Tunnel {
    fn id(&self) -> Uuid {
        match self {
            Tunnel::Standard(t) => t.config().id,
            Tunnel::Reverse(t) => t.config().id,
        }
    }

    fn kind(&self) -> TunnelKind {
        match self {
            Tunnel::Standard(_) => TunnelKind::Standard,
            Tunnel::Reverse(_) => TunnelKind::Reverse,
        }
    }

    fn tunnel_port(&self) -> u16 {
        match self {
            Tunnel::Standard(t) => t.config().tunnel_port,
            Tunnel::Reverse(t) => t.config().tunnel_port,
        }
    }

    async fn start(&self, cancel: CancellationToken) -> TunnelResult<()> {
        match self {
            Tunnel::Standard(t) => t.start(cancel).await,
            Tunnel::Reverse(t) => t.start(cancel).await,
        }
    }
}

/// Turns a desired config into something runnable.
pub trait TunnelFactory: Send + Sync + 'static {
    type Tunnel: RunTunnel;

    fn build(&self, config: &TunnelConfig) -> Self::Tunnel;
}

/// Builds real tunnels wired to the shared reverse server and key material.
#[derive(Clone)]
pub struct TunnelBuilder {
    options: TunnelOptions,
    keys: KeySource,
    registry: TunnelRegistry,
    forward_queue: usize,
    lifecycles: Arc<dyn LifecycleFactory>,
    stats: Stats,
}

impl TunnelBuilder {
    pub fn new(
        options: TunnelOptions,
        keys: KeySource,
        registry: TunnelRegistry,
        forward_queue: usize,
        lifecycles: Arc<dyn LifecycleFactory>,
        stats: Stats,
    ) -> Self {
        Self {
            options,
            keys,
            registry,
            forward_queue,
            lifecycles,
            stats,
        }
    }
}

impl TunnelFactory for TunnelBuilder {
    type Tunnel = Tunnel;

    fn build(&self, config: &TunnelConfig) -> Tunnel {
        let lifecycle = self.lifecycles.for_tunnel(config.id(), config.kind());
        match config {
            TunnelConfig::Standard(cfg) => Tunnel::Standard(StandardTunnel::new(
                cfg.clone(),
                self.options.clone(),
                self.keys.clone(),
                lifecycle,
                &self.stats,
            )),
            TunnelConfig::Reverse(cfg) => Tunnel::Reverse(ReverseTunnel::new(
                cfg.clone(),
                self.options.clone(),
                self.keys.clone(),
                self.registry.clone(),
                self.forward_queue,
                lifecycle,
                &self.stats,
            )),
        }
    }
}
