//! Collaborator interfaces for debug-format parsing and platform compression.
//!
//! Key derivation from binaries and single-file compression are supplied by
//! external components; only their contracts and the key validity checks
//! live here.

use std::path::Path;

/// Kind of artifact a derived content key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    /// Debug-symbol file keyed by signature + age.
    DebugSymbol,
    /// Native image keyed by link timestamp + image size.
    NativeImage,
}

/// One `(content key, kind)` pair derived from an input file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedKey {
    pub key: String,
    pub kind: KeyKind,
}

/// Derives deterministic content keys from a debug-format binary.
///
/// Implementations return zero pairs for files they do not understand; a
/// key failing [`validate_content_key`] must cause the file to be rejected
/// rather than stored.
pub trait KeySource: Send + Sync {
    fn derive_keys(&self, file_name: &str, data: &[u8]) -> crate::Result<Vec<DerivedKey>>;
}

/// Compresses a single source file into an archive container whose header
/// is patched for reproducibility: the same input content and timestamp
/// must yield byte-identical output.
pub trait Compressor: Send + Sync {
    fn compress(&self, source: &Path, virtual_path: &str) -> std::io::Result<Vec<u8>>;
}

/// Format-specific character/length check for a derived content key.
pub fn validate_content_key(key: &str, kind: KeyKind) -> crate::Result<()> {
    let hex = !key.is_empty() && key.chars().all(|c| c.is_ascii_hexdigit());
    let ok = match kind {
        // Signature (32 hex) plus a 1..8 hex age.
        KeyKind::DebugSymbol => hex && (33..=40).contains(&key.len()),
        // Timestamp (8 hex) plus a 1..8 hex image size.
        KeyKind::NativeImage => hex && (9..=16).contains(&key.len()),
    };
    if ok {
        Ok(())
    } else {
        Err(crate::Error::InvalidContentKey(format!(
            "{key:?} is not a valid {kind:?} key"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_symbol_key_validation() {
        let guid = "0123456789abcdef0123456789abcdef";
        assert!(validate_content_key(&format!("{guid}1"), KeyKind::DebugSymbol).is_ok());
        assert!(validate_content_key(&format!("{guid}FFFFFFFF"), KeyKind::DebugSymbol).is_ok());
        assert!(validate_content_key(guid, KeyKind::DebugSymbol).is_err());
        assert!(validate_content_key(&format!("{guid}xyz"), KeyKind::DebugSymbol).is_err());
    }

    #[test]
    fn test_native_image_key_validation() {
        assert!(validate_content_key("ABCDEF12345", KeyKind::NativeImage).is_ok());
        assert!(validate_content_key("ABCDEF12", KeyKind::NativeImage).is_err());
        assert!(validate_content_key("ABCDEF12345678901", KeyKind::NativeImage).is_err());
        assert!(validate_content_key("", KeyKind::NativeImage).is_err());
    }

    struct FixedKeys(Vec<DerivedKey>);

    impl KeySource for FixedKeys {
        fn derive_keys(&self, _file_name: &str, _data: &[u8]) -> crate::Result<Vec<DerivedKey>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_key_source_contract() {
        let source = FixedKeys(vec![DerivedKey {
            key: "ABCDEF1234".to_string(),
            kind: KeyKind::NativeImage,
        }]);
        let keys = source.derive_keys("bar.dll", b"mz").unwrap();
        assert_eq!(keys.len(), 1);
        assert!(validate_content_key(&keys[0].key, keys[0].kind).is_ok());
    }
}
