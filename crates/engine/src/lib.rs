//! Consistency and synchronization engines for symvault.
//!
//! The consistency engine validates and repairs a single store: key casing,
//! tag record fields, reachability of data files from tags. The sync engine
//! copies one validated store into another, resolving content collisions by
//! policy. Both bound their storage concurrency per pass.

pub mod consistency;
pub mod error;
pub mod executor;
pub mod markers;
pub mod path_tree;
pub mod sync;
pub mod tag_store;

pub use consistency::{ConsistencyEngine, ConsistencyMode, ConsistencyOptions, ConsistencyReport};
pub use error::{EngineError, EngineResult};
pub use markers::{create_markers, ensure_markers, validate_markers};
pub use path_tree::PathTree;
pub use sync::{SyncEngine, SyncOptions, SyncReport};
pub use tag_store::StoredTag;
