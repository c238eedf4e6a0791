//! Collision-resolution policy applied during store synchronization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Policy applied per colliding file. The set is closed; every call site
/// matches it exhaustively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionResolutionMode {
    /// Report an error, do not upload, fail the whole run.
    Terminate,
    /// Keep the existing destination content; skip the upload.
    KeepExisted,
    /// Copy the destination content into the backup store, then upload.
    Overwrite,
    /// Upload without taking a backup.
    OverwriteWithoutBackup,
}

impl fmt::Display for CollisionResolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Terminate => "terminate",
            Self::KeepExisted => "keep-existed",
            Self::Overwrite => "overwrite",
            Self::OverwriteWithoutBackup => "overwrite-without-backup",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CollisionResolutionMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "terminate" => Ok(Self::Terminate),
            "keep-existed" => Ok(Self::KeepExisted),
            "overwrite" => Ok(Self::Overwrite),
            "overwrite-without-backup" => Ok(Self::OverwriteWithoutBackup),
            other => Err(crate::Error::Config(format!(
                "unknown collision resolution mode: {other}"
            ))),
        }
    }
}
