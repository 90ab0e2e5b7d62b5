//! Desired tunnel configuration as produced by the control database.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown tunnel kind '{0}'")]
    UnknownTunnelKind(String),

    #[error("unknown key kind '{0}'")]
    UnknownKeyKind(String),

    #[error("{kind} tunnel {id} is missing field '{field}'")]
    MissingField { kind: TunnelKind, id: Uuid, field: &'static str },

    #[error("port {value} for field '{field}' is out of range")]
    PortOutOfRange { field: &'static str, value: i64 },
}

/// Which side of the SSH connection this process plays for a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelKind {
    /// Outbound: we are the SSH client.
    Standard,
    /// Inbound: a remote agent connects to our SSH server.
    Reverse,
}

impl TunnelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelKind::Standard => "standard",
            TunnelKind::Reverse => "reverse",
        }
    }
}

impl fmt::Display for TunnelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TunnelKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" | "normal" => Ok(TunnelKind::Standard),
            "reverse" => Ok(TunnelKind::Reverse),
            other => Err(TypeError::UnknownTunnelKind(other.to_string())),
        }
    }
}

/// Outbound tunnel: dial `ssh_host:ssh_port`, listen on `tunnel_port`, forward to `service_host:service_port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardTunnelConfig {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub enabled: bool,
    pub tunnel_port: u16,
    /// Falls back to the configured default user when unset.
    pub ssh_user: Option<String>,
    pub ssh_host: String,
    pub ssh_port: u16,
    pub service_host: String,
    pub service_port: u16,
}

impl StandardTunnelConfig {
    /// Compare only the fields that shape the live connection.
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.ssh_user == other.ssh_user
            && self.ssh_host == other.ssh_host
            && self.ssh_port == other.ssh_port
            && self.tunnel_port == other.tunnel_port
            && self.service_host == other.service_host
            && self.service_port == other.service_port
    }

    pub fn ssh_user_or<'a>(&'a self, default_user: &'a str) -> &'a str {
        match self.ssh_user.as_deref() {
            Some(user) if !user.is_empty() => user,
            _ => default_user,
        }
    }
}

/// Inbound tunnel: remote agents authenticate with an authorized key and forward through `tunnel_port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseTunnelConfig {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub enabled: bool,
    pub tunnel_port: u16,
}

impl ReverseTunnelConfig {
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.id == other.id && self.tunnel_port == other.tunnel_port
    }
}

/// A single entry of the desired tunnel set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TunnelConfig {
    Standard(StandardTunnelConfig),
    Reverse(ReverseTunnelConfig),
}

impl TunnelConfig {
    pub fn id(&self) -> Uuid {
        match self {
            TunnelConfig::Standard(cfg) => cfg.id,
            TunnelConfig::Reverse(cfg) => cfg.id,
        }
    }

    pub fn kind(&self) -> TunnelKind {
        match self {
            TunnelConfig::Standard(_) => TunnelKind::Standard,
            TunnelConfig::Reverse(_) => TunnelKind::Reverse,
        }
    }

    pub fn tunnel_port(&self) -> u16 {
        match self {
            TunnelConfig::Standard(cfg) => cfg.tunnel_port,
            TunnelConfig::Reverse(cfg) => cfg.tunnel_port,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            TunnelConfig::Standard(cfg) => cfg.enabled,
            TunnelConfig::Reverse(cfg) => cfg.enabled,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            TunnelConfig::Standard(cfg) => cfg.created_at,
            TunnelConfig::Reverse(cfg) => cfg.created_at,
        }
    }

    /// True when both configs would produce the same live tunnel.
    ///
    /// A kind change under the same id always counts as a difference.
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TunnelConfig::Standard(a), TunnelConfig::Standard(b)) => a.semantic_eq(b),
            (TunnelConfig::Reverse(a), TunnelConfig::Reverse(b)) => a.semantic_eq(b),
            _ => false,
        }
    }
}

impl From<StandardTunnelConfig> for TunnelConfig {
    fn from(cfg: StandardTunnelConfig) -> Self {
        TunnelConfig::Standard(cfg)
    }
}

impl From<ReverseTunnelConfig> for TunnelConfig {
    fn from(cfg: ReverseTunnelConfig) -> Self {
        TunnelConfig::Reverse(cfg)
    }
}

#[cfg(test)]
#[path = "tunnel_tests.rs"]
mod tests;
