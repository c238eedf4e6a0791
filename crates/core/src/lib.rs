//! Core domain types and shared logic for the symvault symbol-store tool.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Validated storage key paths
//! - Canonical-path normalization per storage format
//! - Tag records and their persistence format
//! - Access classification, store formats and marker keys
//! - Collision-resolution policy
//! - Run statistics
//! - Collaborator interfaces for key derivation and compression

pub mod collision;
pub mod config;
pub mod error;
pub mod format;
pub mod hash;
pub mod normalizer;
pub mod stats;
pub mod storage_path;
pub mod symbols;
pub mod tag;

pub use collision::CollisionResolutionMode;
pub use config::{ArchiveAccess, StorageConfig};
pub use error::{Error, Result};
pub use format::{AccessMode, StorageFormat};
pub use hash::ContentHash;
pub use normalizer::{normalize, PathStatus};
pub use stats::Statistics;
pub use storage_path::StoragePath;
pub use tag::{Tag, TagProperty};
