//! Storage port and backend adapters for symvault.
//!
//! Every symbol store is accessed through the [`Storage`] trait. Three
//! backends implement it: a local directory tree, an S3 bucket (optionally
//! fronted by CloudFront), and a zip archive container for offline stores.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::archive::ArchiveStorage;
pub use backends::filesystem::FilesystemStorage;
pub use backends::s3::S3Storage;
pub use error::{StorageError, StorageResult};
pub use traits::{ChildEntry, ChildStream, ChildrenMode, Storage, StorageExt};

use std::sync::Arc;
use symvault_core::StorageConfig;

/// Construct a backend from its configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    config
        .validate()
        .map_err(|e| StorageError::Config(e.to_string()))?;
    match config {
        StorageConfig::Filesystem { path } => {
            Ok(Arc::new(FilesystemStorage::new(path).await?))
        }
        StorageConfig::S3 {
            bucket,
            region,
            access_key_id,
            secret_access_key,
            cloudfront_distribution_id,
        } => Ok(Arc::new(
            S3Storage::new(
                bucket,
                region.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                cloudfront_distribution_id.clone(),
            )
            .await?,
        )),
        StorageConfig::Archive {
            path,
            access,
            reader_concurrency,
            commit_threshold_bytes,
        } => Ok(Arc::new(ArchiveStorage::open(
            path,
            *access,
            *reader_concurrency,
            *commit_threshold_bytes,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symvault_core::ArchiveAccess;

    #[tokio::test]
    async fn test_from_config_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: dir.path().join("store"),
        };
        let storage = from_config(&config).await.unwrap();
        assert_eq!(storage.backend_name(), "filesystem");
        assert!(storage.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_from_config_archive_create() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::Archive {
            path: dir.path().join("store.zip"),
            access: ArchiveAccess::Create,
            reader_concurrency: 2,
            commit_threshold_bytes: 1024,
        };
        let storage = from_config(&config).await.unwrap();
        assert_eq!(storage.backend_name(), "archive");
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid() {
        let config = StorageConfig::Archive {
            path: std::path::PathBuf::new(),
            access: ArchiveAccess::ReadOnly,
            reader_concurrency: 0,
            commit_threshold_bytes: 0,
        };
        assert!(from_config(&config).await.is_err());
    }
}
