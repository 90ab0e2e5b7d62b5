use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use ssh_core::keys::KeyAlgorithm;
use tunnel_core::{ConnCheckOptions, DEFAULT_REVERSE_PORT, DEFAULT_SSH_USER, ManagerOptions, ReverseServerOptions, TunnelOptions};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "tb-server", about = "Keeps a fleet of SSH tunnels converged with the state database", version)]
pub struct ServerArgs {
    /// State database path or sqlite: URL
    #[arg(long, env = "TB_DB_URL", value_name = "PATH", global = true)]
    pub db: Option<String>,
    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "TB_LOG_LEVEL", value_name = "LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(flatten)]
    pub run: RunArgs,

    #[command(subcommand)]
    pub cmd: Option<ServerSubcommand>,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Address the shared reverse tunnel SSH server binds to
    #[arg(long, env = "TB_REVERSE_BIND", value_name = "ADDR", default_value = "0.0.0.0", help_heading = "Reverse Server")]
    pub reverse_bind: String,
    #[arg(long, env = "TB_REVERSE_PORT", value_name = "PORT", default_value_t = DEFAULT_REVERSE_PORT, help_heading = "Reverse Server")]
    pub reverse_port: u16,
    /// Host key file; generated on first start when missing
    #[arg(long, env = "TB_HOST_KEY", value_name = "PATH", help_heading = "Reverse Server")]
    pub host_key: Option<PathBuf>,

    /// Address every tunnel listener binds to
    #[arg(long, env = "TB_BIND_HOST", value_name = "ADDR", default_value = "127.0.0.1", help_heading = "Tunnels")]
    pub bind_host: String,
    /// SSH user for standard tunnels that do not set one
    #[arg(long, env = "TB_DEFAULT_USER", value_name = "USER", default_value = DEFAULT_SSH_USER, help_heading = "Tunnels")]
    pub default_user: String,
    #[arg(long, env = "TB_DIAL_TIMEOUT", value_name = "SECS", default_value_t = 15, help_heading = "Tunnels")]
    pub dial_timeout: u64,
    #[arg(long, env = "TB_KEEPALIVE_INTERVAL", value_name = "SECS", default_value_t = 60, help_heading = "Tunnels")]
    pub keepalive_interval: u64,
    #[arg(long, env = "TB_KEEPALIVE_TIMEOUT", value_name = "SECS", default_value_t = 15, help_heading = "Tunnels")]
    pub keepalive_timeout: u64,

    /// How often the desired tunnel set is refreshed and reconciled
    #[arg(long, env = "TB_REFRESH_INTERVAL", value_name = "SECS", default_value_t = 1, help_heading = "Manager")]
    pub refresh_interval: u64,
    /// Delay before a stopped tunnel is started again
    #[arg(long, env = "TB_RESTART_INTERVAL", value_name = "SECS", default_value_t = 15, help_heading = "Manager")]
    pub restart_interval: u64,

    /// Probe every tunnel's public endpoint and publish its health
    #[arg(long, env = "TB_CONNCHECK", action = clap::ArgAction::SetTrue, help_heading = "Discovery")]
    pub conncheck: bool,
    /// Host end users reach tunnels on
    #[arg(long, env = "TB_DISCOVERY_HOST", value_name = "HOST", default_value = "localhost", help_heading = "Discovery")]
    pub discovery_host: String,
}

impl RunArgs {
    pub fn to_tunnel_options(&self) -> TunnelOptions {
        TunnelOptions {
            bind_host: self.bind_host.clone(),
            default_user: self.default_user.clone(),
            dial_timeout: Duration::from_secs(self.dial_timeout),
            keepalive_interval: Duration::from_secs(self.keepalive_interval.max(1)),
            keepalive_timeout: Duration::from_secs(self.keepalive_timeout),
            ..TunnelOptions::default()
        }
    }

    pub fn to_reverse_options(&self) -> ReverseServerOptions {
        ReverseServerOptions {
            bind_host: self.reverse_bind.clone(),
            port: self.reverse_port,
            host_key_path: self.host_key.clone(),
            ..ReverseServerOptions::default()
        }
    }

    pub fn to_manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            refresh_interval: Duration::from_secs(self.refresh_interval.max(1)),
            restart_interval: Duration::from_secs(self.restart_interval),
            conncheck: self.conncheck.then(ConnCheckOptions::default),
            ..ManagerOptions::default()
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ServerSubcommand {
    /// Run the manager and the reverse tunnel server (default)
    Run,
    /// Manage desired tunnels
    Tunnels {
        #[command(subcommand)]
        cmd: TunnelsCmd,
    },
    /// Manage tunnel key material
    Keys {
        #[command(subcommand)]
        cmd: KeysCmd,
    },
    /// Probe a tunnel's public endpoint once
    Check { id: Uuid },
}

#[derive(Debug, Subcommand)]
pub enum TunnelsCmd {
    /// Add an outbound tunnel: local port -> ssh host -> service
    AddStandard {
        /// Local port end users connect to
        #[arg(long)]
        port: u16,
        #[arg(long)]
        ssh_host: String,
        #[arg(long, default_value_t = 22)]
        ssh_port: u16,
        #[arg(long)]
        ssh_user: Option<String>,
        #[arg(long)]
        service_host: String,
        #[arg(long)]
        service_port: u16,
        /// Create the tunnel disabled
        #[arg(long, action = clap::ArgAction::SetTrue)]
        disabled: bool,
    },
    /// Add an inbound tunnel served through remote agents
    AddReverse {
        /// Port agents forward through
        #[arg(long)]
        port: u16,
        #[arg(long, action = clap::ArgAction::SetTrue)]
        disabled: bool,
    },
    /// List every tunnel
    List {
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,
    },
    Enable { id: Uuid },
    Disable { id: Uuid },
    /// Delete a tunnel and its key authorizations
    Delete { id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum KeyAlgorithmArg {
    #[default]
    Ed25519,
    Rsa,
}

impl From<KeyAlgorithmArg> for KeyAlgorithm {
    fn from(value: KeyAlgorithmArg) -> Self {
        match value {
            KeyAlgorithmArg::Ed25519 => KeyAlgorithm::Ed25519,
            KeyAlgorithmArg::Rsa => KeyAlgorithm::Rsa,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum KeysCmd {
    /// Generate a key pair for a tunnel and store the half this server needs.
    ///
    /// Standard tunnels keep the private key and print the public key to install
    /// on the remote host; reverse tunnels keep the public key and print the
    /// private key for the agent.
    Generate {
        #[arg(long)]
        tunnel: Uuid,
        #[arg(long, value_enum, default_value_t = KeyAlgorithmArg::Ed25519)]
        algorithm: KeyAlgorithmArg,
    },
    /// Authorize an existing key file for a tunnel
    Authorize {
        #[arg(long)]
        tunnel: Uuid,
        /// Private key (standard tunnels) or OpenSSH public key (reverse tunnels)
        file: PathBuf,
    },
}
