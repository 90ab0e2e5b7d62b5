use std::{io, time::Duration};

use ssh_core::SshCoreError;
use state_store::DbError;
use tb_types::TunnelKind;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced by tunnels, the reverse server and the reconciliation loops.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The tunnel failed before it was ready to accept connections.
    #[error("boot error [{event}]: {source}")]
    Boot {
        event: &'static str,
        #[source]
        source: Box<TunnelError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    #[error(transparent)]
    SshCore(#[from] SshCoreError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("{action} timed out after {timeout:?}")]
    Timeout { action: &'static str, timeout: Duration },

    #[error("ssh authentication failed for {user}@{address}")]
    AuthFailed { user: String, address: String },

    #[error("{kind} tunnel {id} has no keys")]
    NoKeys { kind: TunnelKind, id: Uuid },

    #[error("key {id} not found in keystore")]
    KeyNotFound { id: Uuid },

    #[error("keepalive failed: {0}")]
    Keepalive(String),

    #[error("listener failed: {0}")]
    Listener(#[source] io::Error),

    #[error("port {port} is already registered by tunnel {owner}")]
    PortConflict { port: u16, owner: Uuid },

    #[error("forwarding channel unavailable: {0}")]
    Forward(String),

    #[error("listing tunnels failed: {0}")]
    List(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("tunnels have not been refreshed for {age:?}")]
    Stale { age: Duration },

    #[error("tunnel task panicked")]
    Panicked,

    #[error("{0}")]
    Other(String),
}

/// Result type alias for tunnel operations
pub type TunnelResult<T> = Result<T, TunnelError>;

impl TunnelError {
    /// Tag an error as a boot failure for `event`. Already-tagged errors keep their original event.
    pub fn boot(event: &'static str, err: impl Into<TunnelError>) -> Self {
        match err.into() {
            err @ TunnelError::Boot { .. } => err,
            err => TunnelError::Boot {
                event,
                source: Box::new(err),
            },
        }
    }

    pub fn is_boot(&self) -> bool {
        matches!(self, TunnelError::Boot { .. })
    }

    pub fn boot_event(&self) -> Option<&'static str> {
        match self {
            TunnelError::Boot { event, .. } => Some(event),
            _ => None,
        }
    }
}
