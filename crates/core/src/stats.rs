//! Lock-free run statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters accumulated across a run. Errors and warnings make the
/// run's outcome a failure; fixes are tallied separately for reporting.
#[derive(Debug, Default)]
pub struct Statistics {
    errors: AtomicU64,
    warnings: AtomicU64,
    fixes: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_warning(&self) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_fix(&self) {
        self.fixes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn warnings(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn fixes(&self) -> u64 {
        self.fixes.load(Ordering::Relaxed)
    }

    /// A run failed if it accumulated any error or warning.
    pub fn has_problems(&self) -> bool {
        self.errors() > 0 || self.warnings() > 0
    }
}
