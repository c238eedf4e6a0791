//! Validated storage key paths.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Separator used by all storage keys, regardless of host platform.
pub const SEPARATOR: char = '/';

/// An immutable, validated forward-slash path used as the universal key type.
///
/// Invariants: non-empty, no leading or trailing separator, no backslash,
/// no empty, `.` or `..` segments. Equality and ordering are ordinal on the
/// underlying string.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoragePath(String);

impl StoragePath {
    /// Create a path from a string, validating the key invariants.
    pub fn new(path: impl Into<String>) -> crate::Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(crate::Error::InvalidStoragePath(
                "path cannot be empty".to_string(),
            ));
        }
        if path.contains('\\') {
            return Err(crate::Error::InvalidStoragePath(format!(
                "path contains backslash: {path}"
            )));
        }
        if path.starts_with(SEPARATOR) || path.ends_with(SEPARATOR) {
            return Err(crate::Error::InvalidStoragePath(format!(
                "path has leading or trailing separator: {path}"
            )));
        }
        for segment in path.split(SEPARATOR) {
            if segment.is_empty() {
                return Err(crate::Error::InvalidStoragePath(format!(
                    "path has empty segment: {path}"
                )));
            }
            if segment == "." || segment == ".." {
                return Err(crate::Error::InvalidStoragePath(format!(
                    "path has relative segment: {path}"
                )));
            }
        }
        Ok(Self(path))
    }

    /// Create a path from a platform path string, normalizing backslashes.
    pub fn from_platform(path: &str) -> crate::Result<Self> {
        Self::new(path.replace('\\', "/"))
    }

    /// Get the path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate the `/`-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// First segment (the file-name tier of a data path).
    pub fn first_segment(&self) -> &str {
        // A validated path always has at least one segment.
        self.segments().next().unwrap_or(&self.0)
    }

    /// Append a segment, returning a new path.
    pub fn join(&self, segment: &str) -> crate::Result<Self> {
        Self::new(format!("{}{SEPARATOR}{segment}", self.0))
    }

    /// Parent directory path, or `None` for a single-segment path.
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rfind(SEPARATOR)
            .map(|idx| Self(self.0[..idx].to_string()))
    }

    /// Whether this path lies under the given directory path.
    pub fn starts_with(&self, dir: &StoragePath) -> bool {
        self.0 == dir.0
            || (self.0.len() > dir.0.len()
                && self.0.starts_with(&dir.0)
                && self.0.as_bytes()[dir.0.len()] == SEPARATOR as u8)
    }
}

impl fmt::Debug for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoragePath({})", self.0)
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for StoragePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for StoragePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}
