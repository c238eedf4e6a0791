//! Engine error types.

use symvault_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid store: {0}")]
    InvalidStore(String),

    #[error("tag error: {0}")]
    Tag(String),

    #[error("synchronization aborted: {0}")]
    SyncAborted(String),
}

impl From<symvault_core::Error> for EngineError {
    fn from(e: symvault_core::Error) -> Self {
        Self::Tag(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
