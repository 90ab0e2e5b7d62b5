//! Byte forwarding between tunnel endpoints.
//!
//! [`ForwardingSession`] is the full-duplex copier shared by standard and reverse
//! tunnels; [`ForwardSession`] abstracts "open a channel to host:port" over an SSH
//! client session so callers can substitute in-memory streams in tests.

mod pipeline;
mod traits;

pub use pipeline::{ByteCounters, ForwardingSession, is_graceful_close};
pub use traits::{ForwardSession, ForwardStream, ForwardStreamIo};
