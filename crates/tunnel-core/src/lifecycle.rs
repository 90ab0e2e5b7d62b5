//! Tunnel lifecycle event reporting.
//!
//! Every tunnel receives a [`Lifecycle`] from its supervisor and reports boot
//! progress, per-connection sessions and failures through it. Swapping in
//! [`NoopLifecycle`] never changes tunnel behaviour.

use std::sync::Arc;

use tb_types::TunnelKind;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::TunnelError, stats::{Stats, Tags, tags}
};

pub trait Lifecycle: Send + Sync {
    /// `start` was entered.
    fn start(&self);
    fn boot_event(&self, event: &str, tags: &Tags);
    fn boot_error(&self, err: &TunnelError);
    /// The tunnel is accepting connections.
    fn open(&self);
    fn session_event(&self, session_id: Uuid, event: &str, tags: &Tags);
    fn session_error(&self, session_id: Uuid, err: &TunnelError);
    fn error(&self, err: &TunnelError);
    /// The tunnel stopped accepting connections.
    fn close(&self);
    /// `start` is about to return.
    fn stop(&self);
}

pub type SharedLifecycle = Arc<dyn Lifecycle>;

/// Hands each supervised tunnel its own lifecycle sink.
pub trait LifecycleFactory: Send + Sync {
    fn for_tunnel(&self, id: Uuid, kind: TunnelKind) -> SharedLifecycle;
}

pub struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {
    fn start(&self) {}
    fn boot_event(&self, _event: &str, _tags: &Tags) {}
    fn boot_error(&self, _err: &TunnelError) {}
    fn open(&self) {}
    fn session_event(&self, _session_id: Uuid, _event: &str, _tags: &Tags) {}
    fn session_error(&self, _session_id: Uuid, _err: &TunnelError) {}
    fn error(&self, _err: &TunnelError) {}
    fn close(&self) {}
    fn stop(&self) {}
}

impl LifecycleFactory for NoopLifecycle {
    fn for_tunnel(&self, _id: Uuid, _kind: TunnelKind) -> SharedLifecycle {
        Arc::new(NoopLifecycle)
    }
}

/// Logs every event with the tunnel's identity and mirrors it as a stats event.
pub struct LoggingLifecycle {
    tunnel_id: Uuid,
    kind: TunnelKind,
    stats: Stats,
}

impl LoggingLifecycle {
    pub fn new(tunnel_id: Uuid, kind: TunnelKind, stats: &Stats) -> Self {
        let stats = stats.with_tags(tags([("tunnel_id", tunnel_id.to_string()), ("tunnel_type", kind.to_string())]));
        Self { tunnel_id, kind, stats }
    }

    fn emit(&self, title: &str, text: &str, extra: &Tags) {
        self.stats.event(title, text, extra);
    }
}

impl Lifecycle for LoggingLifecycle {
    fn start(&self) {
        info!(tunnel_id = %self.tunnel_id, tunnel_type = %self.kind, "tunnel starting");
        self.emit("tunnel.start", "", &Tags::new());
    }

    fn boot_event(&self, event: &str, tags: &Tags) {
        info!(tunnel_id = %self.tunnel_id, tunnel_type = %self.kind, event, ?tags, "tunnel boot event");
        self.emit(&format!("tunnel.boot.{event}"), "", tags);
    }

    fn boot_error(&self, err: &TunnelError) {
        error!(tunnel_id = %self.tunnel_id, tunnel_type = %self.kind, %err, "tunnel failed to boot");
        self.emit("tunnel.boot_error", &err.to_string(), &Tags::new());
    }

    fn open(&self) {
        info!(tunnel_id = %self.tunnel_id, tunnel_type = %self.kind, "tunnel open");
        self.emit("tunnel.open", "", &Tags::new());
    }

    fn session_event(&self, session_id: Uuid, event: &str, tags: &Tags) {
        info!(tunnel_id = %self.tunnel_id, %session_id, event, ?tags, "tunnel session event");
        let mut extra = tags.clone();
        extra.insert("session_id".into(), session_id.to_string());
        self.emit(&format!("tunnel.session.{event}"), "", &extra);
    }

    fn session_error(&self, session_id: Uuid, err: &TunnelError) {
        warn!(tunnel_id = %self.tunnel_id, %session_id, %err, "tunnel session error");
        let extra = tags([("session_id", session_id)]);
        self.emit("tunnel.session_error", &err.to_string(), &extra);
    }

    fn error(&self, err: &TunnelError) {
        error!(tunnel_id = %self.tunnel_id, tunnel_type = %self.kind, %err, "tunnel error");
        self.emit("tunnel.error", &err.to_string(), &Tags::new());
    }

    fn close(&self) {
        info!(tunnel_id = %self.tunnel_id, tunnel_type = %self.kind, "tunnel closed");
        self.emit("tunnel.close", "", &Tags::new());
    }

    fn stop(&self) {
        info!(tunnel_id = %self.tunnel_id, tunnel_type = %self.kind, "tunnel stopped");
        self.emit("tunnel.stop", "", &Tags::new());
    }
}

/// Builds a [`LoggingLifecycle`] per tunnel.
pub struct LoggingLifecycleFactory {
    stats: Stats,
}

impl LoggingLifecycleFactory {
    pub fn new(stats: Stats) -> Self {
        Self { stats }
    }
}

impl LifecycleFactory for LoggingLifecycleFactory {
    fn for_tunnel(&self, id: Uuid, kind: TunnelKind) -> SharedLifecycle {
        Arc::new(LoggingLifecycle::new(id, kind, &self.stats))
    }
}
