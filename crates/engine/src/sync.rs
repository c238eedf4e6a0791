//! Cross-store synchronization.
//!
//! Copies a validated source store into a target store, re-canonicalizing
//! keys for the target's format and resolving content collisions by policy.

use crate::consistency::{ConsistencyEngine, ConsistencyMode, ConsistencyOptions};
use crate::error::{EngineError, EngineResult};
use crate::executor::{collect_bounded, try_for_each_bounded};
use crate::markers::{ensure_markers, validate_markers};
use std::sync::atomic::{AtomicU64, Ordering};
use symvault_core::format::is_internal;
use symvault_core::normalizer::{self, has_weak_content_key};
use symvault_core::{
    CollisionResolutionMode, ContentHash, PathStatus, Statistics, StorageFormat, StoragePath,
};
use symvault_storage::{ChildrenMode, Storage, StorageExt};
use tracing::{error, info, instrument, warn};

#[derive(Clone, Copy, Debug)]
pub struct SyncOptions {
    /// Maximum in-flight storage operations per pass.
    pub concurrency: usize,
    /// Format the target store uses (and is bootstrapped with when empty).
    pub target_format: StorageFormat,
    /// Policy applied to colliding data files.
    pub collision_mode: CollisionResolutionMode,
    /// Stricter policy for artifacts with a structurally weak content key;
    /// falls back to `collision_mode` when unset.
    pub weak_key_collision_mode: Option<CollisionResolutionMode>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 32,
            target_format: StorageFormat::Normal,
            collision_mode: CollisionResolutionMode::Terminate,
            weak_key_collision_mode: None,
        }
    }
}

/// Outcome of one synchronization run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub stats: Statistics,
    files_copied: AtomicU64,
    files_skipped: AtomicU64,
}

impl SyncReport {
    pub fn has_problems(&self) -> bool {
        self.stats.has_problems()
    }

    pub fn files_copied(&self) -> u64 {
        self.files_copied.load(Ordering::Relaxed)
    }

    pub fn files_skipped(&self) -> u64 {
        self.files_skipped.load(Ordering::Relaxed)
    }
}

/// One scheduled copy, decided during the diff pass and executed in bulk.
struct PlannedCopy {
    src: StoragePath,
    dst: StoragePath,
}

pub struct SyncEngine<'a> {
    source: &'a dyn Storage,
    target: &'a dyn Storage,
    /// Receives pre-overwrite target content under [`CollisionResolutionMode::Overwrite`].
    backup: Option<&'a dyn Storage>,
    options: SyncOptions,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        source: &'a dyn Storage,
        target: &'a dyn Storage,
        backup: Option<&'a dyn Storage>,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            target,
            backup,
            options,
        }
    }

    #[instrument(skip(self), fields(
        source = self.source.backend_name(),
        target = self.target.backend_name(),
    ))]
    pub async fn run(&self) -> EngineResult<SyncReport> {
        let report = SyncReport::default();

        // A defective source must not be propagated.
        validate_markers(self.source).await?;
        let source_check = ConsistencyEngine::new(
            self.source,
            ConsistencyOptions {
                mode: ConsistencyMode::Validate,
                concurrency: self.options.concurrency,
                audit_access: false,
            },
        )
        .run()
        .await?;
        if source_check.has_problems() {
            return Err(EngineError::SyncAborted(format!(
                "source store failed validation ({} errors, {} warnings)",
                source_check.stats.errors(),
                source_check.stats.warnings()
            )));
        }

        ensure_markers(self.target, self.options.target_format).await?;

        let entries = self
            .source
            .collect_children(ChildrenMode::WithoutSize, None)
            .await?;
        let planned = {
            let report = &report;
            collect_bounded(
                entries.into_iter().map(|entry| entry.path),
                self.options.concurrency,
                |path| async move { self.plan_file(path, report).await },
            )
            .await?
        };
        let planned: Vec<PlannedCopy> = planned.into_iter().flatten().collect();

        let copied: Vec<StoragePath> = planned.iter().map(|copy| copy.dst.clone()).collect();
        {
            let report = &report;
            try_for_each_bounded(planned, self.options.concurrency, |copy| async move {
                let data = self.source.read(&copy.src).await?;
                let mode = symvault_core::format::expected_access_mode(&copy.dst);
                self.target.write(&copy.dst, mode, data).await?;
                report.files_copied.fetch_add(1, Ordering::Relaxed);
                Ok::<_, EngineError>(())
            })
            .await?;
        }

        self.target.flush().await?;
        if let Some(backup) = self.backup {
            backup.flush().await?;
        }
        if !copied.is_empty() {
            self.target.invalidate_external_services(Some(&copied)).await?;
        }

        info!(
            copied = report.files_copied(),
            skipped = report.files_skipped(),
            errors = report.stats.errors(),
            "synchronization finished"
        );
        Ok(report)
    }

    /// Decide what to do with one source file: skip, plain-copy, or resolve
    /// a collision. Local failures are reported and do not abort the pass.
    async fn plan_file(
        &self,
        path: StoragePath,
        report: &SyncReport,
    ) -> EngineResult<Option<PlannedCopy>> {
        if is_internal(&path) {
            return self.plan_internal_file(path, report).await;
        }

        let dst = match normalizer::normalize(&path, self.options.target_format) {
            PathStatus::Canonical => path.clone(),
            PathStatus::Fixable(fixed) => fixed,
            PathStatus::Malformed(reason) => {
                error!(key = %path, %reason, "source key cannot be mapped to the target format");
                report.stats.add_error();
                return Ok(None);
            }
        };

        if !self.target.exists(&dst).await? {
            return Ok(Some(PlannedCopy { src: path, dst }));
        }

        if self.same_content(&path, &dst).await? {
            report.files_skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        self.resolve_collision(path, dst, report).await
    }

    /// Tag records are copied verbatim: their keys embed a unique file ID
    /// and are never case-renormalized. Marker files are never copied, the
    /// target declares its own format.
    async fn plan_internal_file(
        &self,
        path: StoragePath,
        report: &SyncReport,
    ) -> EngineResult<Option<PlannedCopy>> {
        if path.first_segment() != symvault_core::format::TAG_NAMESPACE {
            return Ok(None);
        }
        if self.target.exists(&path).await? {
            report.files_skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        Ok(Some(PlannedCopy {
            src: path.clone(),
            dst: path,
        }))
    }

    /// Length comparison first; equal lengths fall through to a content-hash
    /// comparison.
    async fn same_content(&self, src: &StoragePath, dst: &StoragePath) -> EngineResult<bool> {
        let src_len = self.source.length(src).await?;
        let dst_len = self.target.length(dst).await?;
        if src_len != dst_len {
            return Ok(false);
        }
        let src_hash = ContentHash::compute(&self.source.read(src).await?);
        let dst_hash = ContentHash::compute(&self.target.read(dst).await?);
        Ok(src_hash == dst_hash)
    }

    async fn resolve_collision(
        &self,
        src: StoragePath,
        dst: StoragePath,
        report: &SyncReport,
    ) -> EngineResult<Option<PlannedCopy>> {
        let mode = if has_weak_content_key(&dst) {
            self.options
                .weak_key_collision_mode
                .unwrap_or(self.options.collision_mode)
        } else {
            self.options.collision_mode
        };

        match mode {
            CollisionResolutionMode::Terminate => {
                error!(key = %dst, "content collision");
                report.stats.add_error();
                Ok(None)
            }
            CollisionResolutionMode::KeepExisted => {
                info!(key = %dst, "content collision, existing content kept");
                report.files_skipped.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            CollisionResolutionMode::Overwrite => {
                let Some(backup) = self.backup else {
                    error!(key = %dst, "collision requires a backup store, none configured");
                    report.stats.add_error();
                    return Ok(None);
                };
                let existing = self.target.read(&dst).await?;
                let mode = symvault_core::format::expected_access_mode(&dst);
                backup.write(&dst, mode, existing).await?;
                warn!(key = %dst, "content collision, existing content backed up and overwritten");
                Ok(Some(PlannedCopy { src, dst }))
            }
            CollisionResolutionMode::OverwriteWithoutBackup => {
                warn!(key = %dst, "content collision, existing content overwritten");
                Ok(Some(PlannedCopy { src, dst }))
            }
        }
    }
}
