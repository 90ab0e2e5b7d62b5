use chrono::Utc;
use tb_types::{ReverseTunnelConfig, TunnelConfig};

use super::*;
use crate::{insert_tunnel, test_support::SqliteTestDbFactory};

async fn reverse_tunnel(pool: &sqlx::SqlitePool) -> anyhow::Result<Uuid> {
    let cfg = TunnelConfig::Reverse(ReverseTunnelConfig {
        id: Uuid::now_v7(),
        created_at: Utc::now(),
        enabled: true,
        tunnel_port: 40022,
    });
    insert_tunnel(pool, &cfg).await?;
    Ok(cfg.id())
}

#[tokio::test]
async fn key_contents_round_trip() -> anyhow::Result<()> {
    let factory = SqliteTestDbFactory::new();
    let db = factory.db().await?;
    let id = insert_key(&db.pool, KeyKind::Public, b"ssh-ed25519 AAAA test").await?;
    assert_eq!(get_key_contents(&db.pool, id).await?.as_deref(), Some(&b"ssh-ed25519 AAAA test"[..]));

    put_key(&db.pool, id, KeyKind::Public, b"replaced").await?;
    assert_eq!(get_key_contents(&db.pool, id).await?.as_deref(), Some(&b"replaced"[..]));

    delete_key(&db.pool, id).await?;
    assert!(get_key_contents(&db.pool, id).await?.is_none());
    assert!(matches!(delete_key(&db.pool, id).await, Err(DbError::KeyNotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn authorizations_are_scoped_by_kind() -> anyhow::Result<()> {
    let factory = SqliteTestDbFactory::new();
    let db = factory.db().await?;
    let tunnel_id = reverse_tunnel(&db.pool).await?;
    let first = insert_key(&db.pool, KeyKind::Public, b"one").await?;
    let second = insert_key(&db.pool, KeyKind::Public, b"two").await?;

    authorize_key(&db.pool, tunnel_id, TunnelKind::Reverse, first).await?;
    authorize_key(&db.pool, tunnel_id, TunnelKind::Reverse, second).await?;
    authorize_key(&db.pool, tunnel_id, TunnelKind::Reverse, first).await?;

    let keys = list_tunnel_keys(&db.pool, tunnel_id, TunnelKind::Reverse).await?;
    assert_eq!(keys, vec![KeyRef::new(first), KeyRef::new(second)]);
    assert!(list_tunnel_keys(&db.pool, tunnel_id, TunnelKind::Standard).await?.is_empty());

    assert!(revoke_key(&db.pool, tunnel_id, first).await?);
    assert!(!revoke_key(&db.pool, tunnel_id, first).await?);
    let keys = list_tunnel_keys(&db.pool, tunnel_id, TunnelKind::Reverse).await?;
    assert_eq!(keys, vec![KeyRef::new(second)]);
    Ok(())
}

#[tokio::test]
async fn deleting_key_drops_its_authorizations() -> anyhow::Result<()> {
    let factory = SqliteTestDbFactory::new();
    let db = factory.db().await?;
    let tunnel_id = reverse_tunnel(&db.pool).await?;
    let key = insert_key(&db.pool, KeyKind::Public, b"one").await?;
    authorize_key(&db.pool, tunnel_id, TunnelKind::Reverse, key).await?;
    delete_key(&db.pool, key).await?;
    assert!(list_tunnel_keys(&db.pool, tunnel_id, TunnelKind::Reverse).await?.is_empty());
    Ok(())
}
