pub mod crypto;
pub mod error;
pub mod forwarding;
pub mod keys;
pub mod logging;
pub mod net;

pub use error::{SshCoreError, SshResult};
