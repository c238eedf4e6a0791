//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How an archive-backed store is opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveAccess {
    /// Concurrent read-only access through a handle pool.
    #[default]
    ReadOnly,
    /// Exclusive read-write access to an existing archive.
    ReadWrite,
    /// Exclusive access, creating the archive if absent.
    Create,
}

impl ArchiveAccess {
    /// Whether this access mode permits mutation.
    pub fn writable(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// Backend selection and credentials for one store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    Filesystem {
        path: PathBuf,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
        /// Optional CloudFront distribution for edge-cache invalidation.
        #[serde(default)]
        cloudfront_distribution_id: Option<String>,
    },
    Archive {
        path: PathBuf,
        #[serde(default)]
        access: ArchiveAccess,
        /// Concurrent read leases for read-only access.
        #[serde(default = "default_reader_concurrency")]
        reader_concurrency: usize,
        /// Uncommitted write volume that forces a container reopen.
        #[serde(default = "default_commit_threshold_bytes")]
        commit_threshold_bytes: u64,
    },
}

impl StorageConfig {
    /// Validate configuration invariants before constructing a backend.
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            Self::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err(crate::Error::Config(
                        "filesystem store requires a path".to_string(),
                    ));
                }
            }
            Self::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err(crate::Error::Config(
                        "s3 store requires a bucket".to_string(),
                    ));
                }
                if access_key_id.is_some() ^ secret_access_key.is_some() {
                    return Err(crate::Error::Config(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ));
                }
            }
            Self::Archive {
                path,
                reader_concurrency,
                ..
            } => {
                if path.as_os_str().is_empty() {
                    return Err(crate::Error::Config(
                        "archive store requires a path".to_string(),
                    ));
                }
                if *reader_concurrency == 0 {
                    return Err(crate::Error::Config(
                        "archive reader_concurrency must be at least 1".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn default_reader_concurrency() -> usize {
    8
}

fn default_commit_threshold_bytes() -> u64 {
    64 * 1024 * 1024
}
