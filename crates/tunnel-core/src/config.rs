//! Runtime options for tunnels, the reverse server and the manager.

use std::{path::PathBuf, time::Duration};

/// Username used for standard tunnels that do not name one.
pub const DEFAULT_SSH_USER: &str = "tunnelbridge";
pub const DEFAULT_REVERSE_PORT: u16 = 2222;

/// Options shared by every tunnel started by this process.
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    /// Host the per-tunnel listeners bind to.
    pub bind_host: String,
    pub default_user: String,
    pub dial_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    /// How often the active connection gauge is published.
    pub stats_interval: Duration,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            default_user: DEFAULT_SSH_USER.to_string(),
            dial_timeout: Duration::from_secs(15),
            keepalive_interval: Duration::from_secs(60),
            keepalive_timeout: Duration::from_secs(15),
            stats_interval: Duration::from_secs(1),
        }
    }
}

/// The shared inbound SSH server.
#[derive(Debug, Clone)]
pub struct ReverseServerOptions {
    pub bind_host: String,
    pub port: u16,
    /// Host key location; generated on first start when missing.
    pub host_key_path: Option<PathBuf>,
    pub auth_rejection_time: Duration,
    /// Pending forward requests buffered per tunnel.
    pub forward_queue: usize,
}

impl Default for ReverseServerOptions {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_REVERSE_PORT,
            host_key_path: None,
            auth_rejection_time: Duration::from_millis(250),
            forward_queue: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnCheckOptions {
    pub interval: Duration,
    pub dial_timeout: Duration,
    /// How long to wait for unsolicited bytes after connecting.
    pub read_wait: Duration,
    pub max_read: usize,
}

impl Default for ConnCheckOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(5),
            read_wait: Duration::from_secs(1),
            max_read: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub refresh_interval: Duration,
    pub restart_interval: Duration,
    /// Upper bound on waiting for a stopped supervisor before starting its replacement.
    pub stop_timeout: Duration,
    /// Run a connectivity check per tunnel when set.
    pub conncheck: Option<ConnCheckOptions>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(1),
            restart_interval: Duration::from_secs(15),
            stop_timeout: Duration::from_secs(5),
            conncheck: None,
        }
    }
}
