//! Narrow interfaces to the outside world: the desired-state feed and key material.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use russh::keys::{PrivateKey, PublicKey};
use secrecy::{ExposeSecret, SecretBox};
use tb_types::{KeyRef, TunnelConfig, TunnelKind};
use uuid::Uuid;

use crate::error::{TunnelError, TunnelResult};

pub type ListFuture = Pin<Box<dyn Future<Output = TunnelResult<Vec<TunnelConfig>>> + Send>>;

/// Returns the current desired tunnel set (enabled tunnels only).
pub type ListFunc = Arc<dyn Fn() -> ListFuture + Send + Sync>;

/// Wrap an async closure as a [`ListFunc`].
pub fn list_func<F, Fut>(f: F) -> ListFunc
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TunnelResult<Vec<TunnelConfig>>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

pub type SecretBytes = SecretBox<Vec<u8>>;

/// Key-value store for key contents.
#[async_trait]
pub trait Keystore: Send + Sync {
    async fn get(&self, key: KeyRef) -> TunnelResult<SecretBytes>;
    async fn set(&self, key: KeyRef, contents: Vec<u8>) -> TunnelResult<()>;
    async fn delete(&self, key: KeyRef) -> TunnelResult<()>;
}

/// Which keys belong to a tunnel: private keys for standard tunnels, authorized public keys for reverse ones.
#[async_trait]
pub trait KeyLookup: Send + Sync {
    async fn tunnel_keys(&self, tunnel_id: Uuid, kind: TunnelKind) -> TunnelResult<Vec<KeyRef>>;
}

#[derive(Default)]
pub struct InMemoryKeystore {
    keys: RwLock<HashMap<Uuid, Vec<u8>>>,
}

impl InMemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Keystore for InMemoryKeystore {
    async fn get(&self, key: KeyRef) -> TunnelResult<SecretBytes> {
        let keys = self.keys.read().map_err(|_| TunnelError::Other("keystore lock poisoned".into()))?;
        keys.get(&key.id)
            .map(|contents| SecretBox::new(Box::new(contents.clone())))
            .ok_or(TunnelError::KeyNotFound { id: key.id })
    }

    async fn set(&self, key: KeyRef, contents: Vec<u8>) -> TunnelResult<()> {
        let mut keys = self.keys.write().map_err(|_| TunnelError::Other("keystore lock poisoned".into()))?;
        keys.insert(key.id, contents);
        Ok(())
    }

    async fn delete(&self, key: KeyRef) -> TunnelResult<()> {
        let mut keys = self.keys.write().map_err(|_| TunnelError::Other("keystore lock poisoned".into()))?;
        keys.remove(&key.id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryKeyLookup {
    keys: RwLock<HashMap<(Uuid, TunnelKind), Vec<KeyRef>>>,
}

impl InMemoryKeyLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authorize(&self, tunnel_id: Uuid, kind: TunnelKind, key: KeyRef) {
        if let Ok(mut keys) = self.keys.write() {
            let entry = keys.entry((tunnel_id, kind)).or_default();
            if !entry.contains(&key) {
                entry.push(key);
            }
        }
    }
}

#[async_trait]
impl KeyLookup for InMemoryKeyLookup {
    async fn tunnel_keys(&self, tunnel_id: Uuid, kind: TunnelKind) -> TunnelResult<Vec<KeyRef>> {
        let keys = self.keys.read().map_err(|_| TunnelError::Other("key lookup lock poisoned".into()))?;
        Ok(keys.get(&(tunnel_id, kind)).cloned().unwrap_or_default())
    }
}

/// Resolves and parses a tunnel's keys.
#[derive(Clone)]
pub struct KeySource {
    lookup: Arc<dyn KeyLookup>,
    keystore: Arc<dyn Keystore>,
}

impl KeySource {
    pub fn new(lookup: Arc<dyn KeyLookup>, keystore: Arc<dyn Keystore>) -> Self {
        Self { lookup, keystore }
    }

    pub fn keystore(&self) -> &Arc<dyn Keystore> {
        &self.keystore
    }

    async fn contents(&self, tunnel_id: Uuid, kind: TunnelKind) -> TunnelResult<Vec<SecretBytes>> {
        let refs = self.lookup.tunnel_keys(tunnel_id, kind).await?;
        if refs.is_empty() {
            return Err(TunnelError::NoKeys { kind, id: tunnel_id });
        }
        let mut contents = Vec::with_capacity(refs.len());
        for key in refs {
            contents.push(self.keystore.get(key).await?);
        }
        Ok(contents)
    }

    /// Signing keys for a standard tunnel. Any unparseable key fails the whole lookup.
    pub async fn private_keys(&self, tunnel_id: Uuid) -> TunnelResult<Vec<PrivateKey>> {
        self.contents(tunnel_id, TunnelKind::Standard)
            .await?
            .iter()
            .map(|secret| ssh_core::keys::load_private_key(secret.expose_secret()).map_err(TunnelError::from))
            .collect()
    }

    /// Public keys allowed to forward through a reverse tunnel.
    pub async fn authorized_keys(&self, tunnel_id: Uuid) -> TunnelResult<Vec<PublicKey>> {
        self.contents(tunnel_id, TunnelKind::Reverse)
            .await?
            .iter()
            .map(|secret| ssh_core::keys::parse_public_key(secret.expose_secret()).map_err(TunnelError::from))
            .collect()
    }
}
