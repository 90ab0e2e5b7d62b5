//! Tunnel fleet engine.
//!
//! A [`Manager`] polls the desired tunnel set and keeps one [`Supervisor`] per
//! tunnel. Standard tunnels dial out over SSH; reverse tunnels register with a
//! shared [`ReverseServer`] and are fed by remote agents.

pub mod config;
pub mod conncheck;
pub mod discovery;
pub mod error;
mod forwarder;
pub mod lifecycle;
pub mod manager;
pub mod reverse;
pub mod services;
pub mod standard;
pub mod stats;
pub mod store;
pub mod supervisor;
pub mod tunnel;

pub use config::{ConnCheckOptions, DEFAULT_REVERSE_PORT, DEFAULT_SSH_USER, ManagerOptions, ReverseServerOptions, TunnelOptions};
pub use discovery::{Discovery, StaticDiscovery};
pub use error::{TunnelError, TunnelResult};
pub use lifecycle::{Lifecycle, LifecycleFactory, LoggingLifecycle, LoggingLifecycleFactory, NoopLifecycle, SharedLifecycle};
pub use manager::{Manager, RunningTunnel};
pub use reverse::{ReverseServer, ReverseTunnel, TunnelRegistry, load_or_create_host_key};
pub use services::{InMemoryKeyLookup, InMemoryKeystore, KeyLookup, KeySource, Keystore, ListFunc, SecretBytes, list_func};
pub use standard::StandardTunnel;
pub use stats::{MemoryStats, NoopStats, Stats, StatsSink, Tags, TracingStats};
pub use store::{SqliteKeyLookup, SqliteKeystore, sqlite_list_func};
pub use supervisor::Supervisor;
pub use tunnel::{ConnectionDetails, RunTunnel, Tunnel, TunnelBuilder, TunnelFactory};
