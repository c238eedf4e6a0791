//! Archive-file storage backend.
//!
//! A whole store packed into a single zip container, used for offline
//! transfer and inspection. Concurrency safety comes from the resource
//! providers in [`provider`]: writable access goes through one exclusive
//! handle, read-only access through a bounded handle pool.

pub mod provider;

use crate::error::{StorageError, StorageResult};
use crate::traits::{ChildEntry, ChildStream, ChildrenMode, Storage};
use async_trait::async_trait;
use bytes::Bytes;
use provider::{ExclusiveProvider, PooledProvider};
use std::io::Read;
use std::path::Path;
use symvault_core::format::BOOKKEEPING_NAME;
use symvault_core::{AccessMode, ArchiveAccess, StoragePath};
use tracing::instrument;

enum Provider {
    Exclusive(ExclusiveProvider),
    Pooled(PooledProvider),
}

/// Zip-archive-backed symbol store.
pub struct ArchiveStorage {
    provider: Provider,
}

impl ArchiveStorage {
    /// Open an archive store. Read-only access shares up to
    /// `reader_concurrency` handles; writable access serializes on one
    /// handle and commits whenever uncommitted edits pass
    /// `commit_threshold_bytes`.
    pub fn open(
        path: &Path,
        access: ArchiveAccess,
        reader_concurrency: usize,
        commit_threshold_bytes: u64,
    ) -> StorageResult<Self> {
        let provider = match access {
            ArchiveAccess::ReadOnly => {
                Provider::Pooled(PooledProvider::open(path, reader_concurrency)?)
            }
            ArchiveAccess::ReadWrite => Provider::Exclusive(ExclusiveProvider::open(
                path,
                false,
                commit_threshold_bytes,
            )?),
            ArchiveAccess::Create => Provider::Exclusive(ExclusiveProvider::open(
                path,
                true,
                commit_threshold_bytes,
            )?),
        };
        Ok(Self { provider })
    }

    fn read_only_error(&self, path: &StoragePath) -> StorageError {
        StorageError::ReadOnly(format!("archive opened read-only: {path}"))
    }

    /// Entry names use `/` like storage paths; tolerate `\` from archives
    /// produced by other tooling.
    fn entry_path(name: &str) -> Option<StoragePath> {
        StoragePath::from_platform(name).ok()
    }

    async fn all_entries(&self) -> StorageResult<Vec<(String, u64)>> {
        match &self.provider {
            Provider::Exclusive(provider) => {
                let mut lease = provider.lease().await;
                let entries = lease.entries()?;
                lease.release().await?;
                Ok(entries)
            }
            Provider::Pooled(provider) => {
                provider
                    .with_archive(|archive| -> StorageResult<Vec<(String, u64)>> {
                        let mut entries = Vec::with_capacity(archive.len());
                        for index in 0..archive.len() {
                            let entry = archive.by_index(index)?;
                            if !entry.is_dir() {
                                entries.push((entry.name().to_string(), entry.size()));
                            }
                        }
                        Ok(entries)
                    })
                    .await?
            }
        }
    }
}

#[async_trait]
impl Storage for ArchiveStorage {
    #[instrument(skip(self), fields(backend = "archive"))]
    async fn exists(&self, path: &StoragePath) -> StorageResult<bool> {
        match &self.provider {
            Provider::Exclusive(provider) => {
                let lease = provider.lease().await;
                let exists = lease.exists(path.as_str());
                lease.release().await?;
                Ok(exists)
            }
            Provider::Pooled(provider) => {
                let name = path.as_str().to_string();
                provider
                    .with_archive(move |archive| archive.index_for_name(&name).is_some())
                    .await
            }
        }
    }

    #[instrument(skip(self), fields(backend = "archive"))]
    async fn delete(&self, path: &StoragePath) -> StorageResult<()> {
        match &self.provider {
            Provider::Exclusive(provider) => {
                let mut lease = provider.lease().await;
                lease.remove(path.as_str());
                lease.release().await
            }
            Provider::Pooled(_) => Err(self.read_only_error(path)),
        }
    }

    #[instrument(skip(self), fields(backend = "archive"))]
    async fn rename(
        &self,
        src: &StoragePath,
        dst: &StoragePath,
        _mode: AccessMode,
    ) -> StorageResult<()> {
        match &self.provider {
            Provider::Exclusive(provider) => {
                let mut lease = provider.lease().await;
                lease.rename(src.as_str(), dst.as_str())?;
                lease.release().await
            }
            Provider::Pooled(_) => Err(self.read_only_error(src)),
        }
    }

    #[instrument(skip(self), fields(backend = "archive"))]
    async fn length(&self, path: &StoragePath) -> StorageResult<u64> {
        match &self.provider {
            Provider::Exclusive(provider) => {
                let mut lease = provider.lease().await;
                let length = lease.length(path.as_str())?;
                lease.release().await?;
                Ok(length)
            }
            Provider::Pooled(provider) => {
                let name = path.as_str().to_string();
                provider
                    .with_archive(move |archive| -> StorageResult<u64> {
                        match archive.by_name(&name) {
                            Ok(entry) => Ok(entry.size()),
                            Err(zip::result::ZipError::FileNotFound) => {
                                Err(StorageError::NotFound(name.clone()))
                            }
                            Err(e) => Err(e.into()),
                        }
                    })
                    .await?
            }
        }
    }

    fn supports_access_mode(&self) -> bool {
        false
    }

    async fn access_mode(&self, _path: &StoragePath) -> StorageResult<AccessMode> {
        Ok(AccessMode::Unknown)
    }

    async fn set_access_mode(&self, _path: &StoragePath, _mode: AccessMode) -> StorageResult<()> {
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "archive"))]
    async fn read(&self, path: &StoragePath) -> StorageResult<Bytes> {
        match &self.provider {
            Provider::Exclusive(provider) => {
                let mut lease = provider.lease().await;
                let data = lease.read(path.as_str())?;
                lease.release().await?;
                Ok(Bytes::from(data))
            }
            Provider::Pooled(provider) => {
                let name = path.as_str().to_string();
                let data = provider
                    .with_archive(move |archive| -> StorageResult<Vec<u8>> {
                        let mut entry = match archive.by_name(&name) {
                            Ok(entry) => entry,
                            Err(zip::result::ZipError::FileNotFound) => {
                                return Err(StorageError::NotFound(name.clone()))
                            }
                            Err(e) => return Err(e.into()),
                        };
                        let mut data = Vec::with_capacity(entry.size() as usize);
                        entry.read_to_end(&mut data)?;
                        Ok(data)
                    })
                    .await??;
                Ok(Bytes::from(data))
            }
        }
    }

    #[instrument(skip(self, data), fields(backend = "archive", size = data.len()))]
    async fn write(
        &self,
        path: &StoragePath,
        _mode: AccessMode,
        data: Bytes,
    ) -> StorageResult<()> {
        match &self.provider {
            Provider::Exclusive(provider) => {
                let mut lease = provider.lease().await;
                lease.write(path.as_str(), data.to_vec());
                lease.release().await
            }
            Provider::Pooled(_) => Err(self.read_only_error(path)),
        }
    }

    #[instrument(skip(self), fields(backend = "archive"))]
    async fn is_empty(&self) -> StorageResult<bool> {
        let entries = self.all_entries().await?;
        Ok(entries.iter().all(|(name, _)| {
            name == BOOKKEEPING_NAME || name.starts_with(&format!("{BOOKKEEPING_NAME}/"))
        }))
    }

    fn children<'a>(
        &'a self,
        _mode: ChildrenMode,
        prefix: Option<&StoragePath>,
    ) -> ChildStream<'a> {
        let prefix = prefix.cloned();

        let stream = async_stream::try_stream! {
            // Archive listings always know sizes; a snapshot taken under one
            // lease keeps enumeration consistent.
            let entries = self.all_entries().await?;
            for (name, size) in entries {
                let Some(path) = Self::entry_path(&name) else { continue };
                if let Some(prefix) = &prefix {
                    if !path.starts_with(prefix) {
                        continue;
                    }
                }
                yield ChildEntry { path, size: Some(size) };
            }
        };

        Box::pin(stream)
    }

    async fn flush(&self) -> StorageResult<()> {
        match &self.provider {
            Provider::Exclusive(provider) => provider.close().await,
            Provider::Pooled(_) => Ok(()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "archive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StorageExt;

    fn path(s: &str) -> StoragePath {
        StoragePath::new(s).unwrap()
    }

    async fn new_store(dir: &Path) -> (ArchiveStorage, std::path::PathBuf) {
        let archive_path = dir.join("store.zip");
        let storage =
            ArchiveStorage::open(&archive_path, ArchiveAccess::Create, 4, u64::MAX).unwrap();
        (storage, archive_path)
    }

    #[tokio::test]
    async fn test_create_write_flush_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, archive_path) = new_store(dir.path()).await;

        let key = path("foo.pdb/aa11/foo.pdb");
        storage
            .write(&key, AccessMode::Public, Bytes::from("symbols"))
            .await
            .unwrap();
        assert!(storage.exists(&key).await.unwrap());
        assert_eq!(storage.length(&key).await.unwrap(), 7);
        storage.flush().await.unwrap();

        let readonly =
            ArchiveStorage::open(&archive_path, ArchiveAccess::ReadOnly, 4, u64::MAX).unwrap();
        assert_eq!(readonly.read(&key).await.unwrap(), Bytes::from("symbols"));
        assert_eq!(readonly.length(&key).await.unwrap(), 7);
        assert!(matches!(
            readonly.length(&path("foo.pdb/aa11/absent")).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(!readonly.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, archive_path) = new_store(dir.path()).await;
        let key = path("a/b");
        storage
            .write(&key, AccessMode::Public, Bytes::from("x"))
            .await
            .unwrap();
        storage.flush().await.unwrap();

        let readonly =
            ArchiveStorage::open(&archive_path, ArchiveAccess::ReadOnly, 2, u64::MAX).unwrap();
        assert!(matches!(
            readonly
                .write(&key, AccessMode::Public, Bytes::from("y"))
                .await,
            Err(StorageError::ReadOnly(_))
        ));
        assert!(matches!(
            readonly.delete(&key).await,
            Err(StorageError::ReadOnly(_))
        ));
        assert!(matches!(
            readonly.rename(&key, &path("a/c"), AccessMode::Public).await,
            Err(StorageError::ReadOnly(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = new_store(dir.path()).await;

        let src = path("Foo.pdb/AA11/Foo.pdb");
        let dst = path("foo.pdb/aa11/foo.pdb");
        storage
            .write(&src, AccessMode::Public, Bytes::from("x"))
            .await
            .unwrap();
        storage.rename(&src, &dst, AccessMode::Public).await.unwrap();
        assert!(!storage.exists(&src).await.unwrap());
        assert_eq!(storage.read(&dst).await.unwrap(), Bytes::from("x"));

        storage.delete(&dst).await.unwrap();
        assert!(!storage.exists(&dst).await.unwrap());
        // Deleting a missing key is not an error.
        storage.delete(&dst).await.unwrap();
    }

    #[tokio::test]
    async fn test_children_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _) = new_store(dir.path()).await;

        for key in ["a/1/f", "a/2/f", "b/1/f"] {
            storage
                .write(&path(key), AccessMode::Public, Bytes::from("xy"))
                .await
                .unwrap();
        }

        let mut all = storage
            .collect_children(ChildrenMode::WithSize, None)
            .await
            .unwrap();
        all.sort_by(|x, y| x.path.cmp(&y.path));
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].size, Some(2));

        let under_a = storage
            .collect_children(ChildrenMode::WithSize, Some(&path("a")))
            .await
            .unwrap();
        assert_eq!(under_a.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_archive_rejected_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.zip");
        assert!(ArchiveStorage::open(&missing, ArchiveAccess::ReadWrite, 1, 0).is_err());
        assert!(ArchiveStorage::open(&missing, ArchiveAccess::ReadOnly, 1, 0).is_err());
    }
}
