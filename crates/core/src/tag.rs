//! Tag records: metadata for one upload batch.

use crate::format::TAG_NAMESPACE;
use crate::storage_path::StoragePath;
use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime, Time};
use uuid::Uuid;

/// A single ordered key/value property attached to a tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagProperty {
    pub key: String,
    pub value: String,
}

/// Metadata record describing one upload batch and the directories of
/// artifacts it owns. Written once at creation time into the reserved tag
/// namespace; rewritten in place only when the consistency engine repairs a
/// fixable defect or a protection flag changes.
///
/// Field declaration order is the persisted field order; keep it stable so
/// tag files round-trip byte-identically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Identifier of the tool that produced the batch.
    pub tool_id: String,
    /// Unique identifier of this batch.
    pub file_id: Uuid,
    /// Product the batch belongs to.
    pub product: String,
    /// Product version string.
    pub version: String,
    /// Batch creation time; absent in records written by defective tools.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub creation_utc_time: Option<OffsetDateTime>,
    /// Protected tags are excluded from bulk deletion.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_protected: bool,
    /// Free-form ordered properties.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<TagProperty>,
    /// Data-file group roots this batch claims to own, always persisted in
    /// forward-slash form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directories: Vec<StoragePath>,
}

impl Tag {
    /// Deterministic storage key of this tag's record file.
    pub fn storage_path(&self) -> crate::Result<StoragePath> {
        tag_storage_path(&self.product, &self.version, self.file_id)
    }

    /// Serialize to the persisted JSON form.
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Parse from the persisted JSON form.
    pub fn from_json(data: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(data).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}

/// Deterministic tag-record key: `_tags/<product>/<version>/<file-id>.tag`.
pub fn tag_storage_path(product: &str, version: &str, file_id: Uuid) -> crate::Result<StoragePath> {
    if !is_valid_product(product) {
        return Err(crate::Error::InvalidTag(format!(
            "invalid product name: {product:?}"
        )));
    }
    if !is_valid_version(version) {
        return Err(crate::Error::InvalidTag(format!(
            "invalid version: {version:?}"
        )));
    }
    StoragePath::new(format!("{TAG_NAMESPACE}/{product}/{version}/{file_id}.tag"))
}

/// Product names are limited to characters safe across all backends.
pub fn is_valid_product(product: &str) -> bool {
    !product.is_empty()
        && product
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Versions share the product character set.
pub fn is_valid_version(version: &str) -> bool {
    is_valid_product(version)
}

/// Best-effort creation-time recovery from version-string conventions:
/// the first dot- or dash-separated 8-digit `yyyymmdd` field that parses to
/// a plausible calendar date, taken as midnight UTC.
pub fn recover_creation_time(version: &str) -> Option<OffsetDateTime> {
    for part in version.split(['.', '-']) {
        if part.len() != 8 || !part.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let year: i32 = part[..4].parse().ok()?;
        if !(2000..=2100).contains(&year) {
            continue;
        }
        let month: u8 = part[4..6].parse().ok()?;
        let day: u8 = part[6..8].parse().ok()?;
        let month = Month::try_from(month).ok();
        if let Some(month) = month {
            if let Ok(date) = Date::from_calendar_date(year, month, day) {
                return Some(OffsetDateTime::new_utc(date, Time::MIDNIGHT));
            }
        }
    }
    None
}
