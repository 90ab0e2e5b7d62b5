//! Inbound tunnels: this process is the SSH server.
//!
//! One [`ReverseServer`] accepts agents for every reverse tunnel. Each
//! [`ReverseTunnel`] owns its local port and registers the keys allowed to
//! forward for it; an agent authenticating with one of those keys may request
//! `tcpip-forward` for that port only.

mod handler;
mod host_key;
mod registry;
mod request;
mod server;
mod server_manager;
mod tunnel;

pub use handler::ReverseSessionHandler;
pub use host_key::load_or_create_host_key;
pub use registry::{AuthorizedTunnel, RegisteredTunnel, Registration, TunnelRegistry};
pub use request::{ForwardDialer, ForwardRequest};
pub use server::ReverseServer;
pub use tunnel::ReverseTunnel;
