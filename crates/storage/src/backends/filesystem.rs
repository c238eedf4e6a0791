//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ChildEntry, ChildStream, ChildrenMode, Storage};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use symvault_core::format::BOOKKEEPING_NAME;
use symvault_core::{AccessMode, StoragePath};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Local filesystem store.
///
/// Keys map directly onto paths below the store root; [`StoragePath`]
/// validation already excludes separators, relative segments and absolute
/// paths, so no key can escape the root.
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    /// Create a new filesystem store rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn file_path(&self, path: &StoragePath) -> PathBuf {
        self.root.join(path.as_str())
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Remove now-empty parent directories up to (not including) the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root {
                break;
            }
            let empty = match fs::read_dir(current).await {
                Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
                Err(_) => break,
            };
            // Concurrent writers may repopulate the directory; losing the
            // race is fine, pruning is cosmetic.
            if !empty || fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    fn relative_storage_path(&self, path: &Path) -> Option<StoragePath> {
        let rel = path.strip_prefix(&self.root).ok()?;
        StoragePath::from_platform(&rel.to_string_lossy()).ok()
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, path: &StoragePath) -> StorageResult<bool> {
        fs::try_exists(self.file_path(path))
            .await
            .map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, path: &StoragePath) -> StorageResult<()> {
        let file = self.file_path(path);
        match fs::remove_file(&file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::Io(e)),
        }
        self.prune_empty_parents(&file).await;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn rename(
        &self,
        src: &StoragePath,
        dst: &StoragePath,
        _mode: AccessMode,
    ) -> StorageResult<()> {
        let src_path = self.file_path(src);
        let dst_path = self.file_path(dst);
        self.ensure_parent(&dst_path).await?;

        // Two-step move through a unique temporary name so that renames
        // differing only in case work on case-insensitive filesystems.
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        let temp_path = dst_path.with_file_name(
            dst_path
                .file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );
        fs::rename(&src_path, &temp_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(src.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        fs::rename(&temp_path, &dst_path).await?;
        self.prune_empty_parents(&src_path).await;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn length(&self, path: &StoragePath) -> StorageResult<u64> {
        let metadata = fs::metadata(self.file_path(path)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(path.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(metadata.len())
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

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn read(&self, path: &StoragePath) -> StorageResult<Bytes> {
        let data = fs::read(self.file_path(path)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(path.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn write(
        &self,
        path: &StoragePath,
        _mode: AccessMode,
        data: Bytes,
    ) -> StorageResult<()> {
        let file_path = self.file_path(path);
        self.ensure_parent(&file_path).await?;

        // Write to a uniquely named temp file, fsync, then rename for
        // atomicity under concurrent writers of the same key.
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        let temp_path = file_path.with_file_name(
            file_path
                .file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, &file_path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn is_empty(&self) -> StorageResult<bool> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(StorageError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy() != BOOKKEEPING_NAME {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn children<'a>(
        &'a self,
        mode: ChildrenMode,
        prefix: Option<&StoragePath>,
    ) -> ChildStream<'a> {
        let base = match prefix {
            Some(prefix) => self.file_path(prefix),
            None => self.root.clone(),
        };

        let stream = async_stream::try_stream! {
            let base_exists = match fs::try_exists(&base).await {
                Ok(exists) => exists,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => Err(StorageError::Io(e))?,
            };
            if !base_exists {
                return;
            }

            let mut stack = vec![base];
            while let Some(dir) = stack.pop() {
                let mut entries = fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    // file_type() does not follow symlinks; links are
                    // skipped so a listing never leaves the store root.
                    let file_type = entry.file_type().await?;
                    if file_type.is_dir() {
                        stack.push(path);
                    } else if file_type.is_file() {
                        if let Some(storage_path) = self.relative_storage_path(&path) {
                            let size = match mode {
                                ChildrenMode::WithSize => Some(entry.metadata().await?.len()),
                                ChildrenMode::WithoutSize => None,
                            };
                            yield ChildEntry { path: storage_path, size };
                        }
                    }
                }
            }
        };

        Box::pin(stream)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
