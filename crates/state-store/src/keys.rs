//! Key contents and per-tunnel key authorizations.

use chrono::Utc;
use sqlx::SqliteExecutor;
use tb_types::{KeyKind, KeyRef, TunnelKind};
use uuid::Uuid;

use crate::{DbError, DbResult};

/// Store new key contents and return the generated id.
pub async fn insert_key(executor: impl SqliteExecutor<'_>, kind: KeyKind, contents: &[u8]) -> DbResult<Uuid> {
    let id = Uuid::now_v7();
    put_key(executor, id, kind, contents).await?;
    Ok(id)
}

/// Insert or replace key contents under a known id.
pub async fn put_key(executor: impl SqliteExecutor<'_>, id: Uuid, kind: KeyKind, contents: &[u8]) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO keys (id, kind, contents, created_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET kind = excluded.kind, contents = excluded.contents",
    )
    .bind(id)
    .bind(kind.as_str())
    .bind(contents)
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get_key_contents(executor: impl SqliteExecutor<'_>, id: Uuid) -> DbResult<Option<Vec<u8>>> {
    let contents = sqlx::query_scalar::<_, Vec<u8>>("SELECT contents FROM keys WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(contents)
}

pub async fn delete_key(executor: impl SqliteExecutor<'_>, id: Uuid) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM keys WHERE id = ?").bind(id).execute(executor).await?;
    if result.rows_affected() == 0 {
        return Err(DbError::KeyNotFound { id });
    }
    Ok(())
}

/// Attach a key to a tunnel; re-authorizing is a no-op.
pub async fn authorize_key(executor: impl SqliteExecutor<'_>, tunnel_id: Uuid, tunnel_kind: TunnelKind, key_id: Uuid) -> DbResult<()> {
    sqlx::query("INSERT OR IGNORE INTO key_authorizations (tunnel_id, tunnel_kind, key_id) VALUES (?, ?, ?)")
        .bind(tunnel_id)
        .bind(tunnel_kind.as_str())
        .bind(key_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn revoke_key(executor: impl SqliteExecutor<'_>, tunnel_id: Uuid, key_id: Uuid) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM key_authorizations WHERE tunnel_id = ? AND key_id = ?")
        .bind(tunnel_id)
        .bind(key_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Keys authorized for a tunnel of the given kind, oldest first.
pub async fn list_tunnel_keys(executor: impl SqliteExecutor<'_>, tunnel_id: Uuid, tunnel_kind: TunnelKind) -> DbResult<Vec<KeyRef>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT ka.key_id FROM key_authorizations ka
         JOIN keys k ON k.id = ka.key_id
         WHERE ka.tunnel_id = ? AND ka.tunnel_kind = ?
         ORDER BY k.created_at, k.id",
    )
    .bind(tunnel_id)
    .bind(tunnel_kind.as_str())
    .fetch_all(executor)
    .await?;
    Ok(ids.into_iter().map(KeyRef::new).collect())
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
