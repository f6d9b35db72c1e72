//! Error types for cache operations
//!
//! Errors never cross the public `AiCache` surface: every tier converts them
//! into a miss or a no-op and logs them. They are still returned by the
//! fallible constructors and by the tier internals.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Filesystem error while reading or writing the disk tier
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value or the index could not be encoded/decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The index file exists but cannot be parsed
    #[error("Index corruption in {path}: {reason}")]
    IndexCorruption { path: String, reason: String },

    /// Key cannot be used as a blob file name
    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}
