//! Logical reverse tunnels registered on the shared SSH server.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use russh::keys::PublicKey;
use ssh_core::keys::keys_equal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::request::ForwardRequest;
use crate::error::{TunnelError, TunnelResult};

/// A reverse tunnel as seen by the SSH server.
pub struct RegisteredTunnel {
    pub id: Uuid,
    pub port: u16,
    pub authorized_keys: Vec<PublicKey>,
    pub inbound: mpsc::Sender<ForwardRequest>,
    /// Cancelled when the tunnel deregisters; agents forwarding for it are disconnected.
    pub shutdown: CancellationToken,
}

/// A tunnel an authenticated connection may forward for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizedTunnel {
    pub id: Uuid,
    pub port: u16,
}

/// Where an admitted forward is delivered.
pub(crate) struct ForwardTarget {
    pub id: Uuid,
    pub inbound: mpsc::Sender<ForwardRequest>,
    pub shutdown: CancellationToken,
}

struct Entry {
    tunnel: RegisteredTunnel,
    serial: u64,
}

#[derive(Clone, Default)]
pub struct TunnelRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Entry>>>,
    serial: Arc<AtomicU64>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tunnel. Its port must not be held by another tunnel; re-registering
    /// the same id replaces the previous entry.
    pub fn register(&self, tunnel: RegisteredTunnel) -> TunnelResult<Registration> {
        let mut map = self.write()?;
        if let Some(owner) = map
            .values()
            .find(|entry| entry.tunnel.port == tunnel.port && entry.tunnel.id != tunnel.id)
        {
            return Err(TunnelError::PortConflict {
                port: tunnel.port,
                owner: owner.tunnel.id,
            });
        }

        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let id = tunnel.id;
        debug!(tunnel_id = %id, port = tunnel.port, keys = tunnel.authorized_keys.len(), "registering reverse tunnel");
        if let Some(previous) = map.insert(id, Entry { tunnel, serial }) {
            previous.tunnel.shutdown.cancel();
        }
        Ok(Registration {
            registry: self.clone(),
            id,
            serial,
        })
    }

    pub fn deregister(&self, id: Uuid) {
        self.remove_if(id, |_| true);
    }

    fn remove_if(&self, id: Uuid, pred: impl FnOnce(&Entry) -> bool) {
        let Ok(mut map) = self.inner.write() else {
            warn!(tunnel_id = %id, "tunnel registry lock poisoned; skipping deregistration");
            return;
        };
        if map.get(&id).is_some_and(pred) {
            if let Some(entry) = map.remove(&id) {
                debug!(tunnel_id = %id, port = entry.tunnel.port, "deregistered reverse tunnel");
                entry.tunnel.shutdown.cancel();
            }
        }
    }

    /// Every registered tunnel whose authorized keys include `key`.
    pub fn authorized_tunnels(&self, key: &PublicKey) -> Vec<AuthorizedTunnel> {
        let Ok(map) = self.inner.read() else {
            return Vec::new();
        };
        let mut matches: Vec<_> = map
            .values()
            .filter(|entry| entry.tunnel.authorized_keys.iter().any(|k| keys_equal(k, key)))
            .map(|entry| AuthorizedTunnel {
                id: entry.tunnel.id,
                port: entry.tunnel.port,
            })
            .collect();
        matches.sort_by_key(|t| t.port);
        matches
    }

    pub(crate) fn target_for_port(&self, port: u16) -> Option<ForwardTarget> {
        let map = self.inner.read().ok()?;
        map.values()
            .find(|entry| entry.tunnel.port == port)
            .map(|entry| ForwardTarget {
                id: entry.tunnel.id,
                inbound: entry.tunnel.inbound.clone(),
                shutdown: entry.tunnel.shutdown.clone(),
            })
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.inner.read().map(|map| map.contains_key(&id)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> TunnelResult<std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Entry>>> {
        self.inner
            .write()
            .map_err(|_| TunnelError::Other("tunnel registry lock poisoned".into()))
    }
}

/// Keeps a tunnel registered; dropping it deregisters.
///
/// A guard left over from a replaced registration does not remove its successor.
pub struct Registration {
    registry: TunnelRegistry,
    id: Uuid,
    serial: u64,
}

impl Registration {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let serial = self.serial;
        self.registry.remove_if(self.id, |entry| entry.serial == serial);
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
