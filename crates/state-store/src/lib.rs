//! State management for tunnelbridge: SQLite persistence of desired tunnels and key material.
//!
//! ## Module Structure
//!
//! - `db`: Database initialization, migration, and connection management
//! - `tunnels`: Desired tunnel configuration
//! - `keys`: Key contents and per-tunnel key authorizations
//! - `error`: Error types and results

mod db;
mod error;
mod keys;
mod tunnels;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use db::*;
pub use error::{DbError, DbResult};
pub use keys::*;
pub use tb_types::state::{DbHandle, DbLocation, TunnelRow};
pub use tunnels::*;
