//! Error types for the strata partitioned metadata cache.

use thiserror::Error;

/// Cache engine errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed reading leaf {leaf}: {source}")]
    LeafRead {
        leaf: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid partition kind '{0}' (valid kinds are dataset, size, user, weekly)")]
    InvalidPartitionKind(String),

    #[error("Missing cache: {0}. Run `strata update` to build it.")]
    MissingCache(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Unknown cache: {0}")]
    UnknownCache(String),

    #[error("Record does not belong to this cache: {0}")]
    ForeignRecord(String),
}

impl From<config::ConfigError> for CacheError {
    fn from(err: config::ConfigError) -> Self {
        CacheError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

impl CacheError {
    /// Whether this error is a permission failure, which callers treat as
    /// "someone else's cache" rather than a fault.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CacheError::IoError(e) if e.kind() == std::io::ErrorKind::PermissionDenied)
    }
}
