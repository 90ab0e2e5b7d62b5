//! Desired tunnel configuration.

use sqlx::SqliteExecutor;
use tb_types::{TunnelConfig, state::TunnelRow};
use tracing::warn;
use uuid::Uuid;

use crate::{DbError, DbResult};

const SELECT_TUNNEL: &str = "SELECT id, kind, enabled, created_at, tunnel_port, ssh_user, ssh_host, ssh_port, service_host, service_port FROM tunnels";

fn rows_to_configs(rows: Vec<TunnelRow>) -> Vec<TunnelConfig> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            match TunnelConfig::try_from(row) {
                Ok(cfg) => Some(cfg),
                Err(err) => {
                    warn!(tunnel_id = %id, %err, "skipping invalid tunnel row");
                    None
                }
            }
        })
        .collect()
}

/// Enabled tunnels only; this is the desired set the manager reconciles against.
pub async fn list_enabled_tunnels(executor: impl SqliteExecutor<'_>) -> DbResult<Vec<TunnelConfig>> {
    let rows = sqlx::query_as::<_, TunnelRow>(&format!("{SELECT_TUNNEL} WHERE enabled = 1 ORDER BY created_at"))
        .fetch_all(executor)
        .await?;
    Ok(rows_to_configs(rows))
}

pub async fn list_tunnels(executor: impl SqliteExecutor<'_>) -> DbResult<Vec<TunnelConfig>> {
    let rows = sqlx::query_as::<_, TunnelRow>(&format!("{SELECT_TUNNEL} ORDER BY created_at"))
        .fetch_all(executor)
        .await?;
    Ok(rows_to_configs(rows))
}

pub async fn get_tunnel(executor: impl SqliteExecutor<'_>, id: Uuid) -> DbResult<Option<TunnelConfig>> {
    let row = sqlx::query_as::<_, TunnelRow>(&format!("{SELECT_TUNNEL} WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.map(|row| TunnelConfig::try_from(row).map_err(|source| DbError::InvalidRow { id, source }))
        .transpose()
}

pub async fn insert_tunnel(executor: impl SqliteExecutor<'_>, config: &TunnelConfig) -> DbResult<()> {
    let row = TunnelRow::from(config);
    sqlx::query(
        "INSERT INTO tunnels (id, kind, enabled, created_at, tunnel_port, ssh_user, ssh_host, ssh_port, service_host, service_port)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(row.id)
    .bind(row.kind)
    .bind(row.enabled)
    .bind(row.created_at)
    .bind(row.tunnel_port)
    .bind(row.ssh_user)
    .bind(row.ssh_host)
    .bind(row.ssh_port)
    .bind(row.service_host)
    .bind(row.service_port)
    .execute(executor)
    .await?;
    Ok(())
}

/// Replace every column except `id` and `created_at`.
pub async fn update_tunnel(executor: impl SqliteExecutor<'_>, config: &TunnelConfig) -> DbResult<()> {
    let row = TunnelRow::from(config);
    let result = sqlx::query(
        "UPDATE tunnels SET kind = ?, enabled = ?, tunnel_port = ?, ssh_user = ?, ssh_host = ?, ssh_port = ?, service_host = ?, service_port = ?
         WHERE id = ?",
    )
    .bind(row.kind)
    .bind(row.enabled)
    .bind(row.tunnel_port)
    .bind(row.ssh_user)
    .bind(row.ssh_host)
    .bind(row.ssh_port)
    .bind(row.service_host)
    .bind(row.service_port)
    .bind(row.id)
    .execute(executor)
    .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::TunnelNotFound { id: row.id });
    }
    Ok(())
}

pub async fn set_tunnel_enabled(executor: impl SqliteExecutor<'_>, id: Uuid, enabled: bool) -> DbResult<()> {
    let result = sqlx::query("UPDATE tunnels SET enabled = ? WHERE id = ?")
        .bind(enabled)
        .bind(id)
        .execute(executor)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::TunnelNotFound { id });
    }
    Ok(())
}

pub async fn delete_tunnel(executor: impl SqliteExecutor<'_>, id: Uuid) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM tunnels WHERE id = ?").bind(id).execute(executor).await?;
    if result.rows_affected() == 0 {
        return Err(DbError::TunnelNotFound { id });
    }
    Ok(())
}

#[cfg(test)]
#[path = "tunnels_tests.rs"]
mod tests;
