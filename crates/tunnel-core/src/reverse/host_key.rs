//! Host key for the shared reverse server.

use std::path::Path;

use russh::keys::PrivateKey;
use ssh_core::keys::{KeyAlgorithm, generate_keypair, load_private_key, load_private_key_from_str};
use tracing::{info, warn};

use crate::error::TunnelResult;

/// Load the host key at `path`, generating and persisting an Ed25519 key when the file is missing.
///
/// Without a path the key is generated per process and agents will see a new
/// host key on every restart. A file that exists but does not parse is an error.
pub async fn load_or_create_host_key(path: Option<&Path>) -> TunnelResult<PrivateKey> {
    let Some(path) = path else {
        warn!("no host key path configured; using an ephemeral host key");
        let pair = generate_keypair(KeyAlgorithm::Ed25519, "")?;
        return Ok(load_private_key_from_str(&pair.private_pem)?);
    };

    if tokio::fs::try_exists(path).await? {
        let data = tokio::fs::read(path).await?;
        let key = load_private_key(&data)?;
        info!(path = %path.display(), "loaded reverse server host key");
        return Ok(key);
    }

    let pair = generate_keypair(KeyAlgorithm::Ed25519, "tunnelbridge-host")?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, pair.private_pem.as_bytes()).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    info!(path = %path.display(), "generated reverse server host key");
    Ok(load_private_key_from_str(&pair.private_pem)?)
}
