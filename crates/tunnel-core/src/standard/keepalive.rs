//! Keepalive watchdog for an outbound SSH session.
//!
//! russh itself sends the keepalives and tears the session down when replies
//! stop (see [`super::client::build_client_config`]); the watchdog turns that
//! into a tunnel error.

use std::time::Duration;

use russh::client;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::trace;

use crate::error::TunnelError;

/// Runs until the session is found closed and returns why.
///
/// `poll` bounds how long after the close the tunnel notices it.
pub(crate) async fn watch<H>(session: &client::Handle<H>, poll: Duration) -> TunnelError
where
    H: client::Handler,
{
    let mut ticker = interval_at(Instant::now() + poll, poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if session.is_closed() {
            return TunnelError::Keepalive("ssh session closed: keepalives unanswered or connection lost".into());
        }
        trace!("ssh session alive");
    }
}
