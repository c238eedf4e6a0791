//! Store-format marker validation and creation.

use crate::error::{EngineError, EngineResult};
use bytes::Bytes;
use symvault_core::format::{
    MARKER_LEGACY_FLAT, MARKER_LEGACY_TWO_TIER, MARKER_LOWER_CASE, MARKER_SINGLE_TIER,
    MARKER_UPPER_CASE,
};
use symvault_core::{AccessMode, StorageFormat, StoragePath};
use symvault_storage::Storage;
use tracing::info;

fn marker_path(name: &str) -> EngineResult<StoragePath> {
    StoragePath::new(name).map_err(|e| EngineError::InvalidStore(e.to_string()))
}

/// Read a store's markers and derive its format.
///
/// Rejected outright: legacy flat/two-tier layouts, a missing single-tier
/// marker, and mutually exclusive case markers present together. Markers are
/// never coerced.
pub async fn validate_markers(storage: &dyn Storage) -> EngineResult<StorageFormat> {
    for legacy in [MARKER_LEGACY_FLAT, MARKER_LEGACY_TWO_TIER] {
        if storage.exists(&marker_path(legacy)?).await? {
            return Err(EngineError::InvalidStore(format!(
                "unsupported legacy store layout (found marker {legacy})"
            )));
        }
    }
    if !storage.exists(&marker_path(MARKER_SINGLE_TIER)?).await? {
        return Err(EngineError::InvalidStore(format!(
            "missing store marker {MARKER_SINGLE_TIER}"
        )));
    }

    let lower = storage.exists(&marker_path(MARKER_LOWER_CASE)?).await?;
    let upper = storage.exists(&marker_path(MARKER_UPPER_CASE)?).await?;
    match (lower, upper) {
        (true, true) => Err(EngineError::InvalidStore(format!(
            "conflicting case markers: both {MARKER_LOWER_CASE} and {MARKER_UPPER_CASE} present"
        ))),
        (true, false) => Ok(StorageFormat::LowerCase),
        (false, true) => Ok(StorageFormat::UpperCase),
        (false, false) => Ok(StorageFormat::Normal),
    }
}

/// Write the markers declaring a new store's format. Marker files are
/// private: their presence is configuration, not data.
pub async fn create_markers(storage: &dyn Storage, format: StorageFormat) -> EngineResult<()> {
    storage
        .write(
            &marker_path(MARKER_SINGLE_TIER)?,
            AccessMode::Private,
            Bytes::new(),
        )
        .await?;
    let case_marker = match format {
        StorageFormat::Normal => None,
        StorageFormat::LowerCase => Some(MARKER_LOWER_CASE),
        StorageFormat::UpperCase => Some(MARKER_UPPER_CASE),
    };
    if let Some(name) = case_marker {
        storage
            .write(&marker_path(name)?, AccessMode::Private, Bytes::new())
            .await?;
    }
    info!(%format, backend = storage.backend_name(), "store markers created");
    Ok(())
}

/// Validate a target store's markers, bootstrapping an empty store with the
/// requested format. A non-empty store must already match `expected`.
pub async fn ensure_markers(
    storage: &dyn Storage,
    expected: StorageFormat,
) -> EngineResult<StorageFormat> {
    if storage.is_empty().await? {
        create_markers(storage, expected).await?;
        return Ok(expected);
    }
    let actual = validate_markers(storage).await?;
    if actual != expected {
        return Err(EngineError::InvalidStore(format!(
            "store format is {actual}, expected {expected}"
        )));
    }
    Ok(actual)
}
