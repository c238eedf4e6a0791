//! Store consistency validation and repair.
//!
//! A run loads every tag record, canonicalizes data-file keys, builds the
//! directory tree, attributes tag directory references into it, and sweeps
//! files no tag references. Per-item findings never abort the pass; they are
//! tallied in [`Statistics`] and the aggregate decides the run's outcome.

use crate::error::EngineResult;
use crate::executor::collect_bounded;
use crate::markers::validate_markers;
use crate::path_tree::PathTree;
use crate::tag_store::{self, StoredTag};
use std::sync::atomic::{AtomicU64, Ordering};
use symvault_core::format::{expected_access_mode, is_internal};
use symvault_core::normalizer;
use symvault_core::tag::{is_valid_product, is_valid_version, recover_creation_time};
use symvault_core::{PathStatus, Statistics, StorageFormat, StoragePath};
use symvault_storage::{ChildrenMode, Storage, StorageExt};
use tracing::{error, info, instrument, warn};

/// What a consistency run is allowed to change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsistencyMode {
    /// Report findings only.
    Validate,
    /// Repair fixable defects in place: rename mis-cased keys, rewrite dirty
    /// tags, remove unreferenced files.
    Fix,
    /// Like `Fix`, removing unreferenced files without flagging them as
    /// problems.
    Delete,
}

impl ConsistencyMode {
    fn fixing(self) -> bool {
        !matches!(self, Self::Validate)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ConsistencyOptions {
    pub mode: ConsistencyMode,
    /// Maximum in-flight storage operations per pass.
    pub concurrency: usize,
    /// Audit public/private classification of every key.
    pub audit_access: bool,
}

impl Default for ConsistencyOptions {
    fn default() -> Self {
        Self {
            mode: ConsistencyMode::Validate,
            concurrency: 32,
            audit_access: false,
        }
    }
}

/// Outcome of one consistency run. Counters are atomic: passes update the
/// report from many workers at once.
#[derive(Debug, Default)]
pub struct ConsistencyReport {
    pub stats: Statistics,
    tags_processed: AtomicU64,
    files_scanned: AtomicU64,
    files_deleted: AtomicU64,
}

impl ConsistencyReport {
    pub fn has_problems(&self) -> bool {
        self.stats.has_problems()
    }

    pub fn tags_processed(&self) -> u64 {
        self.tags_processed.load(Ordering::Relaxed)
    }

    pub fn files_scanned(&self) -> u64 {
        self.files_scanned.load(Ordering::Relaxed)
    }

    pub fn files_deleted(&self) -> u64 {
        self.files_deleted.load(Ordering::Relaxed)
    }
}

pub struct ConsistencyEngine<'a> {
    storage: &'a dyn Storage,
    options: ConsistencyOptions,
}

impl<'a> ConsistencyEngine<'a> {
    pub fn new(storage: &'a dyn Storage, options: ConsistencyOptions) -> Self {
        Self { storage, options }
    }

    /// Run the full validation/repair pass.
    #[instrument(skip(self), fields(backend = self.storage.backend_name(), mode = ?self.options.mode))]
    pub async fn run(&self) -> EngineResult<ConsistencyReport> {
        let report = ConsistencyReport::default();
        let format = validate_markers(self.storage).await?;

        let tags = tag_store::load_all_tags(self.storage, self.options.concurrency).await?;
        report
            .tags_processed
            .store(tags.len() as u64, Ordering::Relaxed);

        let files = self.scan_data_files(format, &report).await?;
        report
            .files_scanned
            .store(files.len() as u64, Ordering::Relaxed);

        let tree = PathTree::new();
        for file in files {
            tree.insert_file(file);
        }

        for stored in &tags {
            self.process_tag(stored, format, &tree, &report).await?;
        }

        self.sweep(&tree, &report).await?;

        if self.options.audit_access {
            self.audit_access(&report).await?;
        }

        info!(
            tags = report.tags_processed(),
            scanned = report.files_scanned(),
            deleted = report.files_deleted(),
            errors = report.stats.errors(),
            warnings = report.stats.warnings(),
            fixes = report.stats.fixes(),
            "consistency run finished"
        );
        Ok(report)
    }

    /// Enumerate data files and canonicalize their keys against the store
    /// format. In a fixing mode, fixable keys are renamed; otherwise they are
    /// reported and kept under their current key.
    async fn scan_data_files(
        &self,
        format: StorageFormat,
        report: &ConsistencyReport,
    ) -> EngineResult<Vec<StoragePath>> {
        let entries = self
            .storage
            .collect_children(ChildrenMode::WithoutSize, None)
            .await?;
        let fixing = self.options.mode.fixing();

        let files = collect_bounded(
            entries
                .into_iter()
                .map(|entry| entry.path)
                .filter(|path| !is_internal(path)),
            self.options.concurrency,
            |path| async move {
                match normalizer::normalize(&path, format) {
                    PathStatus::Canonical => Ok::<_, crate::error::EngineError>(Some(path)),
                    PathStatus::Fixable(fixed) => {
                        if fixing {
                            self.storage
                                .rename(&path, &fixed, expected_access_mode(&fixed))
                                .await?;
                            report.stats.add_fix();
                            info!(from = %path, to = %fixed, "key canonicalized");
                            Ok(Some(fixed))
                        } else {
                            warn!(key = %path, canonical = %fixed, "key is not canonical");
                            report.stats.add_warning();
                            Ok(Some(path))
                        }
                    }
                    PathStatus::Malformed(reason) => {
                        error!(key = %path, %reason, "malformed data-file key");
                        report.stats.add_error();
                        Ok(None)
                    }
                }
            },
        )
        .await?;

        Ok(files.into_iter().flatten().collect())
    }

    /// Validate one tag, repairing fixable fields, and attribute its
    /// directory references into the tree.
    async fn process_tag(
        &self,
        stored: &StoredTag,
        format: StorageFormat,
        tree: &PathTree,
        report: &ConsistencyReport,
    ) -> EngineResult<()> {
        let fixing = self.options.mode.fixing();
        let mut tag = stored.tag.clone();
        let mut dirty = false;

        if !is_valid_product(&tag.product) {
            error!(tag = %stored.path, product = %tag.product, "invalid product name");
            report.stats.add_error();
        }
        if !is_valid_version(&tag.version) {
            error!(tag = %stored.path, version = %tag.version, "invalid version");
            report.stats.add_error();
        }

        if tag.creation_utc_time.is_none() {
            match recover_creation_time(&tag.version) {
                Some(recovered) => {
                    if fixing {
                        tag.creation_utc_time = Some(recovered);
                        dirty = true;
                        report.stats.add_fix();
                        info!(tag = %stored.path, time = %recovered, "creation time recovered");
                    } else {
                        warn!(tag = %stored.path, "missing creation time (recoverable)");
                        report.stats.add_warning();
                    }
                }
                None => {
                    error!(tag = %stored.path, "missing creation time");
                    report.stats.add_error();
                }
            }
        }

        if tag.directories.is_empty() {
            if fixing {
                tag_store::delete_tag(self.storage, &stored.path).await?;
                report.stats.add_fix();
                info!(tag = %stored.path, "tag with no directories deleted");
            } else {
                error!(tag = %stored.path, "tag has no directories");
                report.stats.add_error();
            }
            return Ok(());
        }

        let mut directories = Vec::with_capacity(tag.directories.len());
        for directory in &tag.directories {
            // Tags persist the Normal canonical form regardless of the
            // store's case folding.
            let canonical = match normalizer::normalize(directory, StorageFormat::Normal) {
                PathStatus::Canonical => directory.clone(),
                PathStatus::Fixable(fixed) => {
                    if fixing {
                        dirty = true;
                        report.stats.add_fix();
                        info!(tag = %stored.path, from = %directory, to = %fixed, "tag directory canonicalized");
                        fixed
                    } else {
                        warn!(tag = %stored.path, directory = %directory, "tag directory is not canonical");
                        report.stats.add_warning();
                        directory.clone()
                    }
                }
                PathStatus::Malformed(reason) => {
                    error!(tag = %stored.path, directory = %directory, %reason, "malformed tag directory");
                    report.stats.add_error();
                    directories.push(directory.clone());
                    continue;
                }
            };

            // Tree lookup uses the store's actual key casing.
            let lookup = self.folded_directory(&canonical, format, report)?;
            match lookup.and_then(|dir| tree.lookup(&dir)) {
                Some(node) => node.add_reference(),
                None => {
                    error!(tag = %stored.path, directory = %canonical, "dangling directory reference");
                    report.stats.add_error();
                }
            }
            directories.push(canonical);
        }
        tag.directories = directories;

        if dirty && fixing {
            let new_path = tag_store::save_tag(self.storage, &tag).await?;
            if new_path != stored.path {
                tag_store::delete_tag(self.storage, &stored.path).await?;
            }
        }
        Ok(())
    }

    /// The store-format key of a Normal-canonical directory, used for tree
    /// lookup. `None` if folding violates key invariants (it cannot for a
    /// canonical input; kept as a reported error rather than a panic).
    fn folded_directory(
        &self,
        canonical: &StoragePath,
        format: StorageFormat,
        report: &ConsistencyReport,
    ) -> EngineResult<Option<StoragePath>> {
        match StoragePath::new(format.fold(canonical.as_str())) {
            Ok(path) => Ok(Some(path)),
            Err(e) => {
                error!(directory = %canonical, error = %e, "directory cannot be folded");
                report.stats.add_error();
                Ok(None)
            }
        }
    }

    /// Remove or report files under directories no tag references.
    async fn sweep(&self, tree: &PathTree, report: &ConsistencyReport) -> EngineResult<()> {
        let mut unreferenced = tree.sweep_unreferenced();
        unreferenced.sort();

        for file in unreferenced {
            match self.options.mode {
                ConsistencyMode::Validate => {
                    warn!(key = %file, "unreferenced file");
                    report.stats.add_warning();
                }
                ConsistencyMode::Fix => {
                    warn!(key = %file, "unreferenced file deleted");
                    report.stats.add_warning();
                    report.stats.add_fix();
                    self.storage.delete(&file).await?;
                    report.files_deleted.fetch_add(1, Ordering::Relaxed);
                }
                ConsistencyMode::Delete => {
                    info!(key = %file, "unreferenced file deleted");
                    report.stats.add_fix();
                    self.storage.delete(&file).await?;
                    report.files_deleted.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }

    /// Compare every key's access mode against its expected classification.
    async fn audit_access(&self, report: &ConsistencyReport) -> EngineResult<()> {
        if !self.storage.supports_access_mode() {
            warn!(
                backend = self.storage.backend_name(),
                "backend cannot report access modes, audit skipped"
            );
            return Ok(());
        }
        let fixing = self.options.mode.fixing();
        let entries = self
            .storage
            .collect_children(ChildrenMode::WithoutSize, None)
            .await?;

        collect_bounded(entries, self.options.concurrency, |entry| async move {
            let expected = expected_access_mode(&entry.path);
            let actual = self.storage.access_mode(&entry.path).await?;
            if actual != expected {
                if fixing {
                    self.storage.set_access_mode(&entry.path, expected).await?;
                    report.stats.add_fix();
                    info!(key = %entry.path, ?expected, ?actual, "access mode corrected");
                } else {
                    warn!(key = %entry.path, ?expected, ?actual, "access mode drift");
                    report.stats.add_warning();
                }
            }
            Ok::<_, crate::error::EngineError>(())
        })
        .await?;
        Ok(())
    }
}
