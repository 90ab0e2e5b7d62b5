use thiserror::Error;

/// Errors that can occur in SSH core operations
#[derive(Error, Debug)]
pub enum SshCoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH protocol error
    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    /// Network binding failed
    #[error("failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Connection failed
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Private or public key material could not be parsed
    #[error("invalid {kind} key: {message}")]
    InvalidKey { kind: &'static str, message: String },

    /// Key generation or encoding failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Empty value where one is required
    #[error("{field} must not be empty")]
    EmptyValue { field: String },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for SSH core operations
pub type SshResult<T> = Result<T, SshCoreError>;

impl SshCoreError {
    pub fn invalid_private(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            kind: "private",
            message: message.into(),
        }
    }

    pub fn invalid_public(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            kind: "public",
            message: message.into(),
        }
    }

    /// Create an empty value error
    pub fn empty(field: impl Into<String>) -> Self {
        Self::EmptyValue { field: field.into() }
    }
}
