//! Resource providers coordinating access to one archive container.
//!
//! Two flavors back the archive adapter: an exclusive provider serializing
//! all access to a single mutable handle, and a pooled provider sharing a
//! small set of read-only handles across concurrent readers.

use crate::error::{StorageError, StorageResult};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard, Semaphore};
use tracing::debug;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

fn join_failure(e: tokio::task::JoinError) -> StorageError {
    StorageError::Archive(format!("archive worker task failed: {e}"))
}

fn open_reader(path: &Path) -> StorageResult<ZipArchive<File>> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.display().to_string())
        } else {
            StorageError::Io(e)
        }
    })?;
    Ok(ZipArchive::new(file)?)
}

/// A mutable view of one archive container.
///
/// Edits accumulate in memory and are folded into the container by
/// [`ArchiveHandle::commit`], which rewrites the archive through a temporary
/// file and reopens it. The provider triggers a commit whenever the
/// accumulated uncommitted write volume passes its threshold, bounding the
/// memory held by an in-progress archive edit.
pub struct ArchiveHandle {
    path: PathBuf,
    /// `None` only for a container that does not exist on disk yet.
    archive: Option<ZipArchive<File>>,
    pending: BTreeMap<String, Vec<u8>>,
    removed: HashSet<String>,
    pending_bytes: u64,
}

impl ArchiveHandle {
    fn open(path: &Path, create: bool) -> StorageResult<Self> {
        let archive = match open_reader(path) {
            Ok(archive) => Some(archive),
            Err(StorageError::NotFound(_)) if create => None,
            Err(e) => return Err(e),
        };
        Ok(Self {
            path: path.to_path_buf(),
            archive,
            pending: BTreeMap::new(),
            removed: HashSet::new(),
            pending_bytes: 0,
        })
    }

    pub fn exists(&self, name: &str) -> bool {
        if self.pending.contains_key(name) {
            return true;
        }
        if self.removed.contains(name) {
            return false;
        }
        self.archive
            .as_ref()
            .is_some_and(|a| a.index_for_name(name).is_some())
    }

    pub fn read(&mut self, name: &str) -> StorageResult<Vec<u8>> {
        if let Some(data) = self.pending.get(name) {
            return Ok(data.clone());
        }
        if self.removed.contains(name) {
            return Err(StorageError::NotFound(name.to_string()));
        }
        let archive = self
            .archive
            .as_mut()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        Ok(data)
    }

    pub fn write(&mut self, name: &str, data: Vec<u8>) {
        if self
            .archive
            .as_ref()
            .is_some_and(|a| a.index_for_name(name).is_some())
        {
            // Shadow the base entry until the next commit.
            self.removed.insert(name.to_string());
        }
        self.pending_bytes += data.len() as u64;
        self.pending.insert(name.to_string(), data);
    }

    pub fn remove(&mut self, name: &str) {
        self.pending.remove(name);
        if self
            .archive
            .as_ref()
            .is_some_and(|a| a.index_for_name(name).is_some())
        {
            self.removed.insert(name.to_string());
        }
    }

    pub fn rename(&mut self, src: &str, dst: &str) -> StorageResult<()> {
        let data = self.read(src)?;
        self.remove(src);
        self.write(dst, data);
        Ok(())
    }

    pub fn length(&mut self, name: &str) -> StorageResult<u64> {
        if let Some(data) = self.pending.get(name) {
            return Ok(data.len() as u64);
        }
        if self.removed.contains(name) {
            return Err(StorageError::NotFound(name.to_string()));
        }
        let archive = self
            .archive
            .as_mut()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        match archive.by_name(name) {
            Ok(entry) => Ok(entry.size()),
            Err(zip::result::ZipError::FileNotFound) => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All live entry names with sizes: base entries not shadowed, plus
    /// uncommitted additions.
    pub fn entries(&mut self) -> StorageResult<Vec<(String, u64)>> {
        let mut entries = Vec::new();
        if let Some(archive) = self.archive.as_mut() {
            for index in 0..archive.len() {
                let entry = archive.by_index(index)?;
                if entry.is_dir() {
                    continue;
                }
                let name = entry.name().to_string();
                if self.removed.contains(&name) || self.pending.contains_key(&name) {
                    continue;
                }
                entries.push((name, entry.size()));
            }
        }
        for (name, data) in &self.pending {
            entries.push((name.clone(), data.len() as u64));
        }
        Ok(entries)
    }

    pub fn pending_bytes(&self) -> u64 {
        self.pending_bytes
    }

    /// Fold uncommitted edits into the container: rewrite through a
    /// temporary file, swap it in, reopen. The rewrite decompresses and
    /// deflates file content, so it runs on the blocking thread pool.
    pub async fn commit(&mut self) -> StorageResult<()> {
        if self.pending.is_empty() && self.removed.is_empty() && self.archive.is_some() {
            return Ok(());
        }

        let path = self.path.clone();
        let mut base = self.archive.take();
        let pending = std::mem::take(&mut self.pending);
        let removed = std::mem::take(&mut self.removed);

        let (base, pending, removed, result) = tokio::task::spawn_blocking(move || {
            let result = rewrite_container(&path, &mut base, &pending, &removed);
            (base, pending, removed, result)
        })
        .await
        .map_err(join_failure)?;

        match result {
            Ok(reopened) => {
                self.archive = Some(reopened);
                debug!(path = %self.path.display(), bytes = self.pending_bytes, "archive committed");
                self.pending_bytes = 0;
                Ok(())
            }
            Err(e) => {
                self.archive = base;
                self.pending = pending;
                self.removed = removed;
                Err(e)
            }
        }
    }
}

/// Rewrite the container at `path`: raw-copy kept base entries, deflate
/// pending ones, fsync, swap the temp file in, reopen. On success the old
/// base handle is consumed; on failure it is left for the caller to restore.
fn rewrite_container(
    path: &Path,
    base: &mut Option<ZipArchive<File>>,
    pending: &BTreeMap<String, Vec<u8>>,
    removed: &HashSet<String>,
) -> StorageResult<ZipArchive<File>> {
    let temp_path = path.with_extension(format!("tmp.{}", Uuid::new_v4()));
    let mut writer = ZipWriter::new(File::create(&temp_path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let result = (|| -> StorageResult<File> {
        if let Some(archive) = base.as_mut() {
            for index in 0..archive.len() {
                let entry = archive.by_index_raw(index)?;
                if entry.is_dir() || removed.contains(entry.name()) {
                    continue;
                }
                writer.raw_copy_file(entry)?;
            }
        }
        for (name, data) in pending {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(data)?;
        }
        Ok(writer.finish()?)
    })();

    let file = match result {
        Ok(file) => file,
        Err(e) => {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }
    };
    file.sync_all()?;
    drop(file);

    // Release the old handle before replacing the file underneath it.
    *base = None;
    std::fs::rename(&temp_path, path)?;
    open_reader(path)
}

/// Serializes all access to one mutable archive handle.
pub struct ExclusiveProvider {
    handle: Mutex<ArchiveHandle>,
    commit_threshold: u64,
}

impl ExclusiveProvider {
    /// Open (or, with `create`, prepare to create) the container.
    pub fn open(path: &Path, create: bool, commit_threshold: u64) -> StorageResult<Self> {
        Ok(Self {
            handle: Mutex::new(ArchiveHandle::open(path, create)?),
            commit_threshold,
        })
    }

    /// Acquire the handle. Every operation holds the lock for its full
    /// duration; the returned lease must be released through
    /// [`ExclusiveLease::release`].
    pub async fn lease(&self) -> ExclusiveLease<'_> {
        ExclusiveLease {
            guard: self.handle.lock().await,
            commit_threshold: self.commit_threshold,
        }
    }

    /// Drain outstanding leases and fold pending edits into the container.
    pub async fn close(&self) -> StorageResult<()> {
        let mut guard = self.handle.lock().await;
        guard.commit().await
    }
}

/// An exclusive lease on the archive handle.
pub struct ExclusiveLease<'a> {
    guard: MutexGuard<'a, ArchiveHandle>,
    commit_threshold: u64,
}

impl ExclusiveLease<'_> {
    /// Return the handle to its provider. If the accumulated uncommitted
    /// write volume passed the threshold, the container is committed and
    /// reopened before the lock is released; a half-reopened handle is never
    /// observable by another lease.
    pub async fn release(mut self) -> StorageResult<()> {
        if self.guard.pending_bytes() >= self.commit_threshold {
            self.guard.commit().await?;
        }
        Ok(())
    }
}

impl Deref for ExclusiveLease<'_> {
    type Target = ArchiveHandle;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for ExclusiveLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// Shares read-only archive handles across concurrent readers, bounded by a
/// counting semaphore.
pub struct PooledProvider {
    path: PathBuf,
    pool: std::sync::Mutex<Vec<ZipArchive<File>>>,
    permits: Semaphore,
}

impl PooledProvider {
    /// Open a pooled provider with at most `concurrency` simultaneous
    /// readers. The container is verified readable up front; per-reader
    /// handles are opened on demand and recycled through the free-list.
    pub fn open(path: &Path, concurrency: usize) -> StorageResult<Self> {
        drop(open_reader(path)?);
        Ok(Self {
            path: path.to_path_buf(),
            pool: std::sync::Mutex::new(Vec::with_capacity(concurrency)),
            permits: Semaphore::new(concurrency),
        })
    }

    /// Run `f` against a pooled handle. Waits while the concurrency level is
    /// exhausted; the zip work itself (entry lookup and inflation) runs on
    /// the blocking thread pool.
    pub async fn with_archive<R, F>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut ZipArchive<File>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StorageError::Archive("archive pool closed".to_string()))?;
        let pooled = self.pool.lock().expect("archive pool lock poisoned").pop();
        let path = self.path.clone();
        let (archive, result) = tokio::task::spawn_blocking(move || -> StorageResult<_> {
            let mut archive = match pooled {
                Some(archive) => archive,
                None => open_reader(&path)?,
            };
            let result = f(&mut archive);
            Ok((archive, result))
        })
        .await
        .map_err(join_failure)??;
        self.pool
            .lock()
            .expect("archive pool lock poisoned")
            .push(archive);
        Ok(result)
    }
}
