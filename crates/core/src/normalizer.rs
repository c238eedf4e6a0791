//! Canonical-path validation for data-file keys.
//!
//! A data-file key has two or three segments: `<file>/<key>` or
//! `<file>/<key>/<file-or-compressed>`. For a given [`StorageFormat`] this
//! module decides whether a key is already canonical, can be mechanically
//! rewritten to canonical form, or is structurally invalid. The function is
//! pure; stores persist its output, so the casing rules here must not drift.

use crate::format::StorageFormat;
use crate::storage_path::StoragePath;

/// Extension of debug-symbol files whose key may carry the sentinel age.
pub const DEBUG_SYMBOL_EXTENSION: &str = "pdb";

/// Extensions of native-image files keyed by link timestamp + size.
pub const NATIVE_IMAGE_EXTENSIONS: [&str; 2] = ["dll", "exe"];

/// Sentinel age suffix of portable debug-symbol keys (lower-case form).
/// Canonically it is kept upper-case so it stands out from the general
/// lower-cased hash.
pub const SENTINEL_AGE: &str = "ffffffff";

/// Outcome of canonical-path validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathStatus {
    /// The key is already canonical for the format.
    Canonical,
    /// The key can be mechanically rewritten to the contained canonical form.
    Fixable(StoragePath),
    /// The key is structurally invalid and cannot be repaired.
    Malformed(String),
}

/// Validate a data-file key against a storage format.
pub fn normalize(path: &StoragePath, format: StorageFormat) -> PathStatus {
    let segments: Vec<&str> = path.segments().collect();
    if segments.len() < 2 || segments.len() > 3 {
        return PathStatus::Malformed(format!(
            "expected 2 or 3 segments, got {}: {path}",
            segments.len()
        ));
    }

    let canonical = match format {
        StorageFormat::Normal => match normal_form(&segments) {
            Ok(canonical) => canonical,
            Err(reason) => return PathStatus::Malformed(reason),
        },
        StorageFormat::LowerCase => path.as_str().to_lowercase(),
        StorageFormat::UpperCase => path.as_str().to_uppercase(),
    };

    if canonical == path.as_str() {
        PathStatus::Canonical
    } else {
        // The canonical form is built by case-folding validated segments, so
        // it always satisfies the key invariants.
        match StoragePath::new(canonical) {
            Ok(fixed) => PathStatus::Fixable(fixed),
            Err(e) => PathStatus::Malformed(e.to_string()),
        }
    }
}

/// Canonical form under the `Normal` symbol-store convention.
fn normal_form(segments: &[&str]) -> Result<String, String> {
    let file = segments[0].to_lowercase();
    let mut key = segments[1].to_lowercase();

    if extension(&file) == Some(DEBUG_SYMBOL_EXTENSION)
        && key.len() == 40
        && is_lower_hex(&key)
        && key.ends_with(SENTINEL_AGE)
    {
        // Portable debug symbols: the sentinel age suffix stays upper-case.
        let prefix_len = key.len() - SENTINEL_AGE.len();
        key = format!("{}{}", &key[..prefix_len], SENTINEL_AGE.to_uppercase());
    } else if matches!(extension(&file), Some(ext) if NATIVE_IMAGE_EXTENSIONS.contains(&ext))
        && key.len() > 8
        && is_lower_hex(&key)
    {
        // Native images: the leading 8 hex chars are the link timestamp,
        // kept upper-case.
        key = format!("{}{}", key[..8].to_uppercase(), &key[8..]);
    }

    let mut canonical = format!("{file}/{key}");
    if segments.len() == 3 {
        let leaf = segments[2].to_lowercase();
        if leaf != file && leaf != compressed_variant(&file) {
            return Err(format!(
                "third segment {leaf:?} matches neither {file:?} nor its compressed variant"
            ));
        }
        canonical.push('/');
        canonical.push_str(&leaf);
    }
    Ok(canonical)
}

/// Compressed-container variant of a file name: the final character is
/// replaced with `_` (e.g. `foo.pdb` -> `foo.pd_`).
pub fn compressed_variant(file: &str) -> String {
    let mut chars: Vec<char> = file.chars().collect();
    if let Some(last) = chars.last_mut() {
        *last = '_';
    }
    chars.into_iter().collect()
}

/// Whether a data-file key is derived from structurally weak inputs (a link
/// timestamp plus image size), warranting stricter collision handling.
pub fn has_weak_content_key(path: &StoragePath) -> bool {
    let segments: Vec<&str> = path.segments().collect();
    if segments.len() < 2 || segments.len() > 3 {
        return false;
    }
    let file = segments[0].to_lowercase();
    let key = segments[1].to_lowercase();
    matches!(extension(&file), Some(ext) if NATIVE_IMAGE_EXTENSIONS.contains(&ext))
        && key.len() > 8
        && key.len() <= 16
        && is_lower_hex(&key)
}

fn extension(file: &str) -> Option<&str> {
    file.rsplit_once('.').map(|(_, ext)| ext)
}

fn is_lower_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> StoragePath {
        StoragePath::new(s).unwrap()
    }

    #[test]
    fn test_structural_errors() {
        assert!(matches!(
            normalize(&path("onlyone"), StorageFormat::Normal),
            PathStatus::Malformed(_)
        ));
        assert!(matches!(
            normalize(&path("a/b/c/d"), StorageFormat::Normal),
            PathStatus::Malformed(_)
        ));
    }

    #[test]
    fn test_canonical_plain_pdb() {
        let p = path("foo.pdb/0123456789abcdef0123456789abcdef01234567/foo.pdb");
        assert_eq!(normalize(&p, StorageFormat::Normal), PathStatus::Canonical);
    }

    #[test]
    fn test_sentinel_age_uppercased() {
        let p = path("foo.pdb/0123456789abcdef0123456789abcdefffffffff/foo.pdb");
        match normalize(&p, StorageFormat::Normal) {
            PathStatus::Fixable(fixed) => assert_eq!(
                fixed.as_str(),
                "foo.pdb/0123456789abcdef0123456789abcdefFFFFFFFF/foo.pdb"
            ),
            other => panic!("expected fixable, got {other:?}"),
        }
        let canonical = path("foo.pdb/0123456789abcdef0123456789abcdefFFFFFFFF/foo.pdb");
        assert_eq!(
            normalize(&canonical, StorageFormat::Normal),
            PathStatus::Canonical
        );
    }

    #[test]
    fn test_sentinel_only_applies_to_forty_hex() {
        // 40 chars but not ending in the sentinel: plain lower-case.
        let p = path("foo.pdb/0123456789ABCDEF0123456789abcdef01234567/foo.pdb");
        match normalize(&p, StorageFormat::Normal) {
            PathStatus::Fixable(fixed) => assert_eq!(
                fixed.as_str(),
                "foo.pdb/0123456789abcdef0123456789abcdef01234567/foo.pdb"
            ),
            other => panic!("expected fixable, got {other:?}"),
        }
    }

    #[test]
    fn test_native_image_timestamp_uppercased() {
        let p = path("bar.dll/abcdef12345678/bar.dll");
        match normalize(&p, StorageFormat::Normal) {
            PathStatus::Fixable(fixed) => {
                assert_eq!(fixed.as_str(), "bar.dll/ABCDEF12345678/bar.dll")
            }
            other => panic!("expected fixable, got {other:?}"),
        }
        let canonical = path("bar.dll/ABCDEF12345678/bar.dll");
        assert_eq!(
            normalize(&canonical, StorageFormat::Normal),
            PathStatus::Canonical
        );
    }

    #[test]
    fn test_short_native_key_left_alone() {
        // Exactly 8 hex chars: no timestamp split.
        let p = path("bar.exe/abcdef12/bar.exe");
        assert_eq!(normalize(&p, StorageFormat::Normal), PathStatus::Canonical);
    }

    #[test]
    fn test_compressed_leaf_accepted() {
        let p = path("foo.pdb/0123456789abcdef0123456789abcdef01234567/foo.pd_");
        assert_eq!(normalize(&p, StorageFormat::Normal), PathStatus::Canonical);
    }

    #[test]
    fn test_mismatched_leaf_rejected() {
        let p = path("foo.pdb/0123456789abcdef0123456789abcdef01234567/bar.pdb");
        assert!(matches!(
            normalize(&p, StorageFormat::Normal),
            PathStatus::Malformed(_)
        ));
    }

    #[test]
    fn test_two_segment_paths() {
        assert_eq!(
            normalize(&path("foo.pdb/aa11"), StorageFormat::Normal),
            PathStatus::Canonical
        );
        match normalize(&path("Foo.pdb/AA11"), StorageFormat::Normal) {
            PathStatus::Fixable(fixed) => assert_eq!(fixed.as_str(), "foo.pdb/aa11"),
            other => panic!("expected fixable, got {other:?}"),
        }
    }

    #[test]
    fn test_case_folded_formats() {
        let mixed = path("Foo.pdb/AA11/Foo.pdb");
        match normalize(&mixed, StorageFormat::LowerCase) {
            PathStatus::Fixable(fixed) => assert_eq!(fixed.as_str(), "foo.pdb/aa11/foo.pdb"),
            other => panic!("expected fixable, got {other:?}"),
        }
        match normalize(&mixed, StorageFormat::UpperCase) {
            PathStatus::Fixable(fixed) => assert_eq!(fixed.as_str(), "FOO.PDB/AA11/FOO.PDB"),
            other => panic!("expected fixable, got {other:?}"),
        }
        assert_eq!(
            normalize(&path("foo.pdb/aa11/foo.pdb"), StorageFormat::LowerCase),
            PathStatus::Canonical
        );
    }

    #[test]
    fn test_idempotent_fix() {
        // Applying a fix and re-normalizing yields Canonical.
        let cases = [
            ("Foo.pdb/0123456789ABCDEF0123456789ABCDEFFFFFFFFF/Foo.pd_", StorageFormat::Normal),
            ("Bar.DLL/abcdef1234/bar.dll", StorageFormat::Normal),
            ("MiXeD.pdb/AA11", StorageFormat::LowerCase),
            ("MiXeD.pdb/AA11", StorageFormat::UpperCase),
        ];
        for (raw, format) in cases {
            match normalize(&path(raw), format) {
                PathStatus::Fixable(fixed) => {
                    assert_eq!(
                        normalize(&fixed, format),
                        PathStatus::Canonical,
                        "fix of {raw} not canonical"
                    );
                }
                other => panic!("expected fixable for {raw}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_lowercase_agrees_with_manual_fold() {
        let raw = path("Foo.pdb/0123456789ABCDEF0123456789abcdef01234567/Foo.pdb");
        match normalize(&raw, StorageFormat::LowerCase) {
            PathStatus::Fixable(fixed) => {
                assert_eq!(fixed.as_str(), raw.as_str().to_lowercase())
            }
            other => panic!("expected fixable, got {other:?}"),
        }
    }

    #[test]
    fn test_compressed_variant() {
        assert_eq!(compressed_variant("foo.pdb"), "foo.pd_");
        assert_eq!(compressed_variant("bar.dll"), "bar.dl_");
    }

    #[test]
    fn test_weak_content_key_classification() {
        assert!(has_weak_content_key(&path("bar.dll/ABCDEF1234/bar.dll")));
        assert!(has_weak_content_key(&path("bar.exe/abcdef1234")));
        // Debug symbols have a strong 40-hex key.
        assert!(!has_weak_content_key(&path(
            "foo.pdb/0123456789abcdef0123456789abcdef01234567/foo.pdb"
        )));
        // Too short for the timestamp+size shape.
        assert!(!has_weak_content_key(&path("bar.dll/abcdef12/bar.dll")));
        // Not hex.
        assert!(!has_weak_content_key(&path("bar.dll/notahexkey/bar.dll")));
    }
}
