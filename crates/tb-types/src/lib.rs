//! Shared type definitions for tunnelbridge.
//!
//! Lightweight data model exchanged between the tunnel engine, the state store
//! and the CLI: desired tunnel configurations, key references and health reports.

pub mod health;
pub mod keys;
pub mod state;
pub mod tunnel;

pub use health::{TunnelDetails, TunnelHealth};
pub use keys::{KeyKind, KeyRef};
pub use tunnel::{ReverseTunnelConfig, StandardTunnelConfig, TunnelConfig, TunnelKind, TypeError};
