use thiserror::Error;

/// Top-level error type for the Sapa system.
///
/// Subsystem crates define their own error types where the failure modes are
/// richer (tools, chat) and implement `From<SapaError>` so that `?` works
/// across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SapaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("Index error: {0}")]
    Index(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SapaError {
    /// True for failures of a remote model provider, including timeouts.
    pub fn is_provider(&self) -> bool {
        matches!(self, SapaError::Provider(_) | SapaError::Timeout { .. })
    }
}

impl From<toml::de::Error> for SapaError {
    fn from(err: toml::de::Error) -> Self {
        SapaError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SapaError {
    fn from(err: toml::ser::Error) -> Self {
        SapaError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SapaError {
    fn from(err: serde_json::Error) -> Self {
        SapaError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Sapa operations.
pub type Result<T> = std::result::Result<T, SapaError>;
