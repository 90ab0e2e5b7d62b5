//! SQLite-backed implementations of the service interfaces.

use async_trait::async_trait;
use secrecy::SecretBox;
use sqlx::SqlitePool;
use tb_types::{KeyKind, KeyRef, TunnelKind};
use uuid::Uuid;

use crate::{
    error::{TunnelError, TunnelResult}, services::{KeyLookup, Keystore, ListFunc, SecretBytes, list_func}
};

/// Desired-state feed reading enabled tunnels from the state database.
pub fn sqlite_list_func(pool: SqlitePool) -> ListFunc {
    list_func(move || {
        let pool = pool.clone();
        async move { Ok(state_store::list_enabled_tunnels(&pool).await?) }
    })
}

#[derive(Clone)]
pub struct SqliteKeystore {
    pool: SqlitePool,
}

impl SqliteKeystore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Keystore for SqliteKeystore {
    async fn get(&self, key: KeyRef) -> TunnelResult<SecretBytes> {
        state_store::get_key_contents(&self.pool, key.id)
            .await?
            .map(|contents| SecretBox::new(Box::new(contents)))
            .ok_or(TunnelError::KeyNotFound { id: key.id })
    }

    /// The stored kind is inferred from whether the contents parse as a private key.
    async fn set(&self, key: KeyRef, contents: Vec<u8>) -> TunnelResult<()> {
        let kind = if ssh_core::keys::load_private_key(&contents).is_ok() {
            KeyKind::Private
        } else {
            KeyKind::Public
        };
        state_store::put_key(&self.pool, key.id, kind, &contents).await?;
        Ok(())
    }

    async fn delete(&self, key: KeyRef) -> TunnelResult<()> {
        state_store::delete_key(&self.pool, key.id).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SqliteKeyLookup {
    pool: SqlitePool,
}

impl SqliteKeyLookup {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyLookup for SqliteKeyLookup {
    async fn tunnel_keys(&self, tunnel_id: Uuid, kind: TunnelKind) -> TunnelResult<Vec<KeyRef>> {
        Ok(state_store::list_tunnel_keys(&self.pool, tunnel_id, kind).await?)
    }
}
