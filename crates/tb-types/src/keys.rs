//! References to key material held in the keystore.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tunnel::TypeError;

/// Whether a stored key is a private signing key (standard tunnels) or an authorized public key (reverse tunnels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Private,
    Public,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Private => "private",
            KeyKind::Public => "public",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(KeyKind::Private),
            "public" => Ok(KeyKind::Public),
            other => Err(TypeError::UnknownKeyKind(other.to_string())),
        }
    }
}

/// Opaque handle used to fetch key contents from a keystore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRef {
    pub id: Uuid,
}

impl KeyRef {
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }
}

impl From<Uuid> for KeyRef {
    fn from(id: Uuid) -> Self {
        Self { id }
    }
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}
