//! Service discovery: where end users reach a tunnel and whether it is healthy.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tb_types::{TunnelDetails, TunnelHealth, TunnelKind};
use tracing::debug;
use uuid::Uuid;

use crate::error::{TunnelError, TunnelResult};

#[async_trait]
pub trait Discovery: Send + Sync {
    async fn register_tunnel(&self, id: Uuid, kind: TunnelKind, port: u16) -> TunnelResult<()>;
    async fn deregister_tunnel(&self, id: Uuid) -> TunnelResult<()>;
    async fn resolve_tunnel_host(&self, kind: TunnelKind, id: Uuid) -> TunnelResult<String>;
    async fn update_health(&self, id: Uuid, health: TunnelHealth, reason: Option<String>) -> TunnelResult<()>;
    async fn tunnel_details(&self, id: Uuid) -> TunnelResult<Option<TunnelDetails>>;
}

/// Every tunnel is reachable on one fixed host; registrations and health live in memory.
pub struct StaticDiscovery {
    host: String,
    entries: RwLock<HashMap<Uuid, TunnelDetails>>,
}

impl StaticDiscovery {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn poisoned() -> TunnelError {
        TunnelError::Discovery("registry lock poisoned".into())
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn register_tunnel(&self, id: Uuid, kind: TunnelKind, port: u16) -> TunnelResult<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        debug!(tunnel_id = %id, tunnel_type = %kind, port, "registering tunnel with discovery");
        entries.insert(
            id,
            TunnelDetails {
                host: self.host.clone(),
                port,
                health: TunnelHealth::Unknown,
                reason: None,
                checked_at: None,
            },
        );
        Ok(())
    }

    async fn deregister_tunnel(&self, id: Uuid) -> TunnelResult<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.remove(&id);
        Ok(())
    }

    async fn resolve_tunnel_host(&self, _kind: TunnelKind, _id: Uuid) -> TunnelResult<String> {
        Ok(self.host.clone())
    }

    async fn update_health(&self, id: Uuid, health: TunnelHealth, reason: Option<String>) -> TunnelResult<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        // Results for a tunnel deregistered mid-check are dropped.
        if let Some(entry) = entries.get_mut(&id) {
            entry.health = health;
            entry.reason = reason;
            entry.checked_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn tunnel_details(&self, id: Uuid) -> TunnelResult<Option<TunnelDetails>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(&id).cloned())
    }
}
