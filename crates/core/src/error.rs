//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid storage path: {0}")]
    InvalidStoragePath(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid content key: {0}")]
    InvalidContentKey(String),

    #[error("invalid tag: {0}")]
    InvalidTag(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
