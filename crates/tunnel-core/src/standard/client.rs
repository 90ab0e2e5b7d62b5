//! Outbound SSH session used by a standard tunnel.

use std::{sync::Arc, time::Duration};

use russh::{
    client,
    keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey},
};
use ssh_core::crypto::default_preferred;
use tracing::{debug, info, warn};

use crate::error::{TunnelError, TunnelResult};

/// Accepts any host key; standard tunnels do not pin remote hosts.
pub struct TunnelClientHandler;

impl client::Handler for TunnelClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub type TunnelSession = client::Handle<TunnelClientHandler>;

/// russh sends a keepalive every `keepalive_interval` and closes the session
/// once more than `keepalive_max` go unanswered, which bounds detection of a
/// silent peer to roughly `interval + timeout`.
pub(crate) fn build_client_config(keepalive_interval: Duration, keepalive_timeout: Duration) -> client::Config {
    client::Config {
        preferred: default_preferred(),
        nodelay: true,
        inactivity_timeout: None,
        keepalive_interval: Some(keepalive_interval),
        keepalive_max: keepalive_max(keepalive_interval, keepalive_timeout),
        ..Default::default()
    }
}

fn keepalive_max(interval: Duration, timeout: Duration) -> usize {
    let interval_ms = interval.as_millis().max(1);
    timeout.as_millis().div_ceil(interval_ms).max(1) as usize
}

/// Dial `host:port` and authenticate `user` with the first key the server accepts.
pub(crate) async fn connect(
    config: client::Config,
    host: &str,
    port: u16,
    user: &str,
    keys: Vec<PrivateKey>,
    dial_timeout: Duration,
) -> TunnelResult<TunnelSession> {
    let address = format!("{host}:{port}");
    debug!(%address, user, "dialing ssh server");
    let connecting = client::connect(Arc::new(config), (host, port), TunnelClientHandler);
    let mut session = tokio::time::timeout(dial_timeout, connecting)
        .await
        .map_err(|_| TunnelError::Timeout {
            action: "ssh dial",
            timeout: dial_timeout,
        })??;

    let rsa_hash_hint = session.best_supported_rsa_hash().await.unwrap_or(None).flatten();
    for key in keys {
        let algorithm = key.algorithm();
        let hash_alg = if key.algorithm().is_rsa() { rsa_hash_hint } else { None };
        let key = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);
        match session.authenticate_publickey(user.to_string(), key).await {
            Ok(result) if result.success() => {
                info!(%address, user, key = ?algorithm, "ssh authentication succeeded");
                return Ok(session);
            }
            Ok(_) => debug!(%address, user, key = ?algorithm, "server rejected key"),
            Err(err) => warn!(%address, user, key = ?algorithm, ?err, "public-key authentication attempt failed"),
        }
    }

    let _ = session
        .disconnect(russh::Disconnect::ByApplication, "authentication failed", "")
        .await;
    Err(TunnelError::AuthFailed {
        user: user.to_string(),
        address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unanswered_keepalive_budget_covers_timeout() {
        let secs = Duration::from_secs;
        assert_eq!(keepalive_max(secs(60), secs(15)), 1);
        assert_eq!(keepalive_max(secs(10), secs(25)), 3);
        assert_eq!(keepalive_max(Duration::from_millis(300), Duration::from_millis(300)), 1);

        let config = build_client_config(secs(60), secs(15));
        assert_eq!(config.keepalive_interval, Some(secs(60)));
        assert_eq!(config.keepalive_max, 1);
        assert!(config.inactivity_timeout.is_none());
    }
}
