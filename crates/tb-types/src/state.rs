//! Shared state-store data models.
//!
//! These structs describe rows persisted in SQLite. They live here so the
//! tunnel engine and CLI can exchange structured data without depending on
//! the state-store implementation.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "sqlx")]
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::tunnel::{ReverseTunnelConfig, StandardTunnelConfig, TunnelConfig, TunnelKind, TypeError};

/// Flat tunnel row; standard-only columns are NULL for reverse tunnels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct TunnelRow {
    pub id: Uuid,
    pub kind: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub tunnel_port: i64,
    pub ssh_user: Option<String>,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<i64>,
    pub service_host: Option<String>,
    pub service_port: Option<i64>,
}

fn port(field: &'static str, value: i64) -> Result<u16, TypeError> {
    u16::try_from(value).map_err(|_| TypeError::PortOutOfRange { field, value })
}

impl TryFrom<TunnelRow> for TunnelConfig {
    type Error = TypeError;

    fn try_from(row: TunnelRow) -> Result<Self, Self::Error> {
        let kind: TunnelKind = row.kind.parse()?;
        let tunnel_port = port("tunnel_port", row.tunnel_port)?;
        match kind {
            TunnelKind::Reverse => Ok(TunnelConfig::Reverse(ReverseTunnelConfig {
                id: row.id,
                created_at: row.created_at,
                enabled: row.enabled,
                tunnel_port,
            })),
            TunnelKind::Standard => {
                let missing = |field| TypeError::MissingField { kind, id: row.id, field };
                Ok(TunnelConfig::Standard(StandardTunnelConfig {
                    id: row.id,
                    created_at: row.created_at,
                    enabled: row.enabled,
                    tunnel_port,
                    ssh_user: row.ssh_user,
                    ssh_host: row.ssh_host.ok_or_else(|| missing("ssh_host"))?,
                    ssh_port: port("ssh_port", row.ssh_port.ok_or_else(|| missing("ssh_port"))?)?,
                    service_host: row.service_host.ok_or_else(|| missing("service_host"))?,
                    service_port: port("service_port", row.service_port.ok_or_else(|| missing("service_port"))?)?,
                }))
            }
        }
    }
}

impl From<&TunnelConfig> for TunnelRow {
    fn from(cfg: &TunnelConfig) -> Self {
        match cfg {
            TunnelConfig::Standard(c) => TunnelRow {
                id: c.id,
                kind: TunnelKind::Standard.as_str().to_string(),
                enabled: c.enabled,
                created_at: c.created_at,
                tunnel_port: c.tunnel_port.into(),
                ssh_user: c.ssh_user.clone(),
                ssh_host: Some(c.ssh_host.clone()),
                ssh_port: Some(c.ssh_port.into()),
                service_host: Some(c.service_host.clone()),
                service_port: Some(c.service_port.into()),
            },
            TunnelConfig::Reverse(c) => TunnelRow {
                id: c.id,
                kind: TunnelKind::Reverse.as_str().to_string(),
                enabled: c.enabled,
                created_at: c.created_at,
                tunnel_port: c.tunnel_port.into(),
                ssh_user: None,
                ssh_host: None,
                ssh_port: None,
                service_host: None,
                service_port: None,
            },
        }
    }
}

/// Wrapper around a pooled SQLite connection plus metadata about its origin.
#[cfg(feature = "sqlx")]
#[derive(Clone, Debug)]
pub struct DbHandle {
    /// Shared connection pool used by callers.
    pub pool: SqlitePool,
    /// Connection URL used to construct the pool.
    pub url: String,
    /// Filesystem path when backed by a local file; `None` for pure URLs.
    pub path: Option<PathBuf>,
    /// True when the database file was just created.
    pub freshly_created: bool,
}

#[cfg(feature = "sqlx")]
impl DbHandle {
    /// Consume the handle and return the underlying pool.
    pub fn into_pool(self) -> SqlitePool {
        self.pool
    }
}

/// Concrete location details for a SQLite-backed state store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DbLocation {
    /// Connection URL (e.g., `sqlite:///var/lib/tunnelbridge/state.db` or `sqlite::memory:`).
    pub url: String,
    /// Local filesystem path when the database is file-backed.
    pub path: Option<PathBuf>,
    /// The database file did not exist before this process opened it.
    pub freshly_created: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reverse_row() -> TunnelRow {
        TunnelRow {
            id: Uuid::now_v7(),
            kind: "reverse".into(),
            enabled: true,
            created_at: Utc::now(),
            tunnel_port: 40022,
            ssh_user: None,
            ssh_host: None,
            ssh_port: None,
            service_host: None,
            service_port: None,
        }
    }

    #[test]
    fn reverse_row_converts() {
        let row = reverse_row();
        let cfg = TunnelConfig::try_from(row.clone()).unwrap();
        assert_eq!(cfg.kind(), TunnelKind::Reverse);
        assert_eq!(cfg.tunnel_port(), 40022);
        assert_eq!(TunnelRow::from(&cfg), row);
    }

    #[test]
    fn standard_row_requires_ssh_host() {
        let mut row = reverse_row();
        row.kind = "standard".into();
        row.ssh_port = Some(22);
        row.service_host = Some("svc".into());
        row.service_port = Some(80);
        match TunnelConfig::try_from(row) {
            Err(TypeError::MissingField { field, .. }) => assert_eq!(field, "ssh_host"),
            other => panic!("unexpected conversion result: {other:?}"),
        }
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let mut row = reverse_row();
        row.tunnel_port = 70000;
        assert!(matches!(
            TunnelConfig::try_from(row),
            Err(TypeError::PortOutOfRange { field: "tunnel_port", .. })
        ));
    }
}
