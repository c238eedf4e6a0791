//! Store-wide canonicalization formats, access classification and marker keys.

use crate::storage_path::StoragePath;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a key's read permission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    /// World-readable.
    Public,
    /// Owner-only.
    Private,
    /// The backend cannot report a mode.
    Unknown,
}

/// Store-wide canonicalization choice, recorded by a marker file at store
/// creation time and immutable thereafter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageFormat {
    /// Mixed-case symbol-store convention.
    #[default]
    Normal,
    /// Every key case-folded to lower case.
    LowerCase,
    /// Every key case-folded to upper case.
    UpperCase,
}

impl StorageFormat {
    /// Apply this format's case folding to a raw key string.
    pub fn fold(&self, s: &str) -> String {
        match self {
            Self::Normal => s.to_string(),
            Self::LowerCase => s.to_lowercase(),
            Self::UpperCase => s.to_uppercase(),
        }
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::LowerCase => "lower-case",
            Self::UpperCase => "upper-case",
        };
        write!(f, "{s}")
    }
}

/// Reserved top-level namespace holding tag records.
pub const TAG_NAMESPACE: &str = "_tags";

/// Required marker declaring the single-tier store layout.
pub const MARKER_SINGLE_TIER: &str = "_symvault.single-tier";

/// Optional marker declaring lower-case canonicalization.
pub const MARKER_LOWER_CASE: &str = "_symvault.lower-case";

/// Optional marker declaring upper-case canonicalization.
pub const MARKER_UPPER_CASE: &str = "_symvault.upper-case";

/// Legacy flat-layout marker; stores carrying it are rejected.
pub const MARKER_LEGACY_FLAT: &str = "flat.txt";

/// Legacy two-tier-layout marker; stores carrying it are rejected.
pub const MARKER_LEGACY_TWO_TIER: &str = "index2.txt";

/// Bookkeeping directory name ignored by emptiness checks. Legacy symbol
/// server tooling leaves its transaction log here.
pub const BOOKKEEPING_NAME: &str = "000Admin";

/// Whether a key belongs to the store's internal namespace (tags, markers).
/// Internal keys are stored with [`AccessMode::Private`] and are excluded
/// from data-file scans.
pub fn is_internal(path: &StoragePath) -> bool {
    let first = path.first_segment();
    first == TAG_NAMESPACE
        || first == MARKER_SINGLE_TIER
        || first == MARKER_LOWER_CASE
        || first == MARKER_UPPER_CASE
        || first == BOOKKEEPING_NAME
        || first == MARKER_LEGACY_FLAT
        || first == MARKER_LEGACY_TWO_TIER
}

/// Expected access mode for a key: internal files are private, data files
/// are public.
pub fn expected_access_mode(path: &StoragePath) -> AccessMode {
    if is_internal(path) {
        AccessMode::Private
    } else {
        AccessMode::Public
    }
}
