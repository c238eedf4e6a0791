//! Tag record persistence.

use crate::error::{EngineError, EngineResult};
use crate::executor::collect_bounded;
use bytes::Bytes;
use symvault_core::format::TAG_NAMESPACE;
use symvault_core::{AccessMode, StoragePath, Tag};
use symvault_storage::{ChildrenMode, Storage, StorageExt};
use tracing::{debug, instrument};

/// A tag record together with the key it was loaded from. The key is kept so
/// a repaired record can be rewritten in place (or moved, when product or
/// version changed) without re-deriving it.
#[derive(Clone, Debug)]
pub struct StoredTag {
    pub path: StoragePath,
    pub tag: Tag,
}

/// Load every tag record under the tag namespace, `concurrency` reads in
/// flight. Unparseable records abort the run; a store whose metadata cannot
/// be read is not safe to repair.
#[instrument(skip(storage), fields(backend = storage.backend_name()))]
pub async fn load_all_tags(
    storage: &dyn Storage,
    concurrency: usize,
) -> EngineResult<Vec<StoredTag>> {
    let namespace = StoragePath::new(TAG_NAMESPACE)
        .map_err(|e| EngineError::InvalidStore(e.to_string()))?;
    let entries = storage
        .collect_children(ChildrenMode::WithoutSize, Some(&namespace))
        .await?;

    let tags = collect_bounded(entries, concurrency, |entry| async move {
        let data = storage.read(&entry.path).await?;
        let tag = Tag::from_json(&data)
            .map_err(|e| EngineError::Tag(format!("{}: {e}", entry.path)))?;
        Ok::<_, EngineError>(StoredTag {
            path: entry.path,
            tag,
        })
    })
    .await?;

    debug!(count = tags.len(), "tag records loaded");
    Ok(tags)
}

/// Persist a tag at its deterministic key. Tag records are private.
pub async fn save_tag(storage: &dyn Storage, tag: &Tag) -> EngineResult<StoragePath> {
    let path = tag.storage_path()?;
    let data = tag.to_json()?;
    storage
        .write(&path, AccessMode::Private, Bytes::from(data))
        .await?;
    Ok(path)
}

/// Remove a tag record.
pub async fn delete_tag(storage: &dyn Storage, path: &StoragePath) -> EngineResult<()> {
    storage.delete(path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use symvault_storage::FilesystemStorage;
    use uuid::Uuid;

    fn sample(product: &str, n: u32) -> Tag {
        Tag {
            tool_id: "symvault/test".to_string(),
            file_id: Uuid::new_v4(),
            product: product.to_string(),
            version: format!("1.0.{n}"),
            creation_utc_time: None,
            is_protected: false,
            properties: Vec::new(),
            directories: vec![StoragePath::new("foo.pdb/aa11").unwrap()],
        }
    }

    #[tokio::test]
    async fn test_save_load_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path()).await.unwrap();

        let mut expected = Vec::new();
        for n in 0..5 {
            let tag = sample("acme", n);
            save_tag(&storage, &tag).await.unwrap();
            expected.push(tag);
        }

        let mut loaded = load_all_tags(&storage, 4).await.unwrap();
        loaded.sort_by(|a, b| a.tag.version.cmp(&b.tag.version));
        expected.sort_by(|a, b| a.version.cmp(&b.version));
        assert_eq!(loaded.len(), 5);
        for (stored, tag) in loaded.iter().zip(&expected) {
            assert_eq!(&stored.tag, tag);
            assert_eq!(stored.path, tag.storage_path().unwrap());
        }

        delete_tag(&storage, &loaded[0].path).await.unwrap();
        assert_eq!(load_all_tags(&storage, 4).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_corrupt_tag_aborts_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path()).await.unwrap();
        storage
            .write(
                &StoragePath::new("_tags/acme/1.0/broken.tag").unwrap(),
                AccessMode::Private,
                Bytes::from("{not json"),
            )
            .await
            .unwrap();
        assert!(matches!(
            load_all_tags(&storage, 2).await,
            Err(EngineError::Tag(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_namespace_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path()).await.unwrap();
        assert!(load_all_tags(&storage, 2).await.unwrap().is_empty());
    }
}
