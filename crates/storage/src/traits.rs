//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use symvault_core::{AccessMode, StoragePath};

/// Whether child enumeration resolves entry sizes. Resolving a size may cost
/// an extra round trip per entry on some backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildrenMode {
    WithSize,
    WithoutSize,
}

/// One enumerated store entry.
#[derive(Clone, Debug)]
pub struct ChildEntry {
    pub path: StoragePath,
    pub size: Option<u64>,
}

/// A boxed stream of enumerated entries.
pub type ChildStream<'a> = Pin<Box<dyn Stream<Item = StorageResult<ChildEntry>> + Send + 'a>>;

/// Uniform port over the symbol-store backends.
///
/// All keys are [`StoragePath`] values. Operations may fail with a
/// backend-specific I/O error; the engines never retry, they abort the run.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Check whether a key exists.
    async fn exists(&self, path: &StoragePath) -> StorageResult<bool>;

    /// Delete a key. Deleting a non-existent key is not an error.
    async fn delete(&self, path: &StoragePath) -> StorageResult<()>;

    /// Atomically move a key, applying `mode` where the backend supports it.
    async fn rename(
        &self,
        src: &StoragePath,
        dst: &StoragePath,
        mode: AccessMode,
    ) -> StorageResult<()>;

    /// Size of a key in bytes.
    async fn length(&self, path: &StoragePath) -> StorageResult<u64>;

    /// Whether the backend can report and change access modes.
    fn supports_access_mode(&self) -> bool;

    /// Classify a key's read permission; `Unknown` when unsupported.
    async fn access_mode(&self, path: &StoragePath) -> StorageResult<AccessMode>;

    /// Change a key's read permission; a no-op when unsupported.
    async fn set_access_mode(&self, path: &StoragePath, mode: AccessMode) -> StorageResult<()>;

    /// Read a key's full content.
    async fn read(&self, path: &StoragePath) -> StorageResult<Bytes>;

    /// Create or overwrite a key.
    async fn write(&self, path: &StoragePath, mode: AccessMode, data: Bytes) -> StorageResult<()>;

    /// True iff enumerating top-level entries (excluding the reserved
    /// bookkeeping name) yields nothing.
    async fn is_empty(&self) -> StorageResult<bool>;

    /// Lazily enumerate entries, optionally below a directory prefix.
    /// Directory-marker pseudo-entries are filtered out.
    fn children<'a>(&'a self, mode: ChildrenMode, prefix: Option<&StoragePath>)
        -> ChildStream<'a>;

    /// Best-effort invalidation of external caches fronting this store.
    /// `None` invalidates everything. A no-op for backends without an edge
    /// cache.
    async fn invalidate_external_services(
        &self,
        paths: Option<&[StoragePath]>,
    ) -> StorageResult<()> {
        let _ = paths;
        Ok(())
    }

    /// Flush buffered state to durable storage. Backends with write-behind
    /// containers commit here; a no-op elsewhere.
    async fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Static backend identifier for metrics and logging.
    fn backend_name(&self) -> &'static str;
}

/// Convenience extension over [`Storage`], provided for every implementation.
#[async_trait]
pub trait StorageExt: Storage {
    /// Collect a full child listing into memory.
    async fn collect_children(
        &self,
        mode: ChildrenMode,
        prefix: Option<&StoragePath>,
    ) -> StorageResult<Vec<ChildEntry>> {
        let mut stream = self.children(mode, prefix);
        let mut entries = Vec::new();
        while let Some(entry) = stream.next().await {
            entries.push(entry?);
        }
        Ok(entries)
    }
}

impl<T: Storage + ?Sized> StorageExt for T {}
