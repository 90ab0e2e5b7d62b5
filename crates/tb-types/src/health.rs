//! Health and connection details reported through discovery.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelHealth {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl TunnelHealth {
    pub fn is_online(&self) -> bool {
        matches!(self, TunnelHealth::Healthy)
    }
}

impl fmt::Display for TunnelHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TunnelHealth::Unknown => "unknown",
            TunnelHealth::Healthy => "online",
            TunnelHealth::Unhealthy => "offline",
        };
        f.write_str(label)
    }
}

/// Where end users reach a tunnel and what the last connectivity check said about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelDetails {
    pub host: String,
    pub port: u16,
    pub health: TunnelHealth,
    pub reason: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
}
