//! Synchronization engine integration tests: collision matrix against the
//! filesystem backend.

use bytes::Bytes;
use symvault_core::{
    AccessMode, ArchiveAccess, CollisionResolutionMode, StorageFormat, StoragePath, Tag,
};
use symvault_engine::{create_markers, validate_markers, SyncEngine, SyncOptions};
use symvault_storage::{ArchiveStorage, FilesystemStorage, Storage, StorageExt};
use time::OffsetDateTime;
use uuid::Uuid;

const PDB_DIR: &str = "lib.pdb/0123456789abcdef0123456789abcdef01234567";
const WEAK_DIR: &str = "app.dll/ABCDEF1234";

fn path(s: &str) -> StoragePath {
    StoragePath::new(s).unwrap()
}

fn options(mode: CollisionResolutionMode) -> SyncOptions {
    SyncOptions {
        concurrency: 4,
        target_format: StorageFormat::Normal,
        collision_mode: mode,
        weak_key_collision_mode: None,
    }
}

/// A valid source store: markers, one tag, data under the tag's directories.
async fn new_source(dir: &std::path::Path, directories: &[&str]) -> FilesystemStorage {
    let storage = FilesystemStorage::new(dir).await.unwrap();
    create_markers(&storage, StorageFormat::Normal).await.unwrap();
    let tag = Tag {
        tool_id: "symvault/test".to_string(),
        file_id: Uuid::new_v4(),
        product: "acme".to_string(),
        version: "1.0".to_string(),
        creation_utc_time: Some(OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()),
        is_protected: false,
        properties: Vec::new(),
        directories: directories.iter().map(|d| path(d)).collect(),
    };
    storage
        .write(
            &tag.storage_path().unwrap(),
            AccessMode::Private,
            Bytes::from(tag.to_json().unwrap()),
        )
        .await
        .unwrap();
    storage
}

async fn write(storage: &FilesystemStorage, key: &str, content: &'static str) {
    storage
        .write(&path(key), AccessMode::Public, Bytes::from(content))
        .await
        .unwrap();
}

async fn read(storage: &FilesystemStorage, key: &str) -> Bytes {
    storage.read(&path(key)).await.unwrap()
}

#[tokio::test]
async fn test_sync_into_empty_target_bootstraps_markers() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let source = new_source(source_dir.path(), &[PDB_DIR]).await;
    let data_key = format!("{PDB_DIR}/lib.pdb");
    write(&source, &data_key, "symbols").await;
    let target = FilesystemStorage::new(target_dir.path()).await.unwrap();

    let engine = SyncEngine::new(
        &source,
        &target,
        None,
        options(CollisionResolutionMode::Terminate),
    );
    let report = engine.run().await.unwrap();
    assert!(!report.has_problems());
    assert_eq!(report.files_copied(), 2); // data file + tag record

    assert_eq!(
        validate_markers(&target).await.unwrap(),
        StorageFormat::Normal
    );
    assert_eq!(read(&target, &data_key).await, Bytes::from("symbols"));
    // The tag record came across verbatim.
    let tags = target
        .collect_children(
            symvault_storage::ChildrenMode::WithoutSize,
            Some(&path("_tags")),
        )
        .await
        .unwrap();
    assert_eq!(tags.len(), 1);
}

#[tokio::test]
async fn test_identical_content_is_a_noop() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let source = new_source(source_dir.path(), &[PDB_DIR]).await;
    let data_key = format!("{PDB_DIR}/lib.pdb");
    write(&source, &data_key, "same").await;

    let target = FilesystemStorage::new(target_dir.path()).await.unwrap();
    create_markers(&target, StorageFormat::Normal).await.unwrap();
    write(&target, &data_key, "same").await;

    // Terminate would flag any collision; identical content never invokes
    // the policy.
    let engine = SyncEngine::new(
        &source,
        &target,
        None,
        options(CollisionResolutionMode::Terminate),
    );
    let report = engine.run().await.unwrap();
    assert!(!report.has_problems());
    assert!(report.files_skipped() >= 1);
}

#[tokio::test]
async fn test_terminate_reports_error_and_keeps_target() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let source = new_source(source_dir.path(), &[PDB_DIR]).await;
    let data_key = format!("{PDB_DIR}/lib.pdb");
    write(&source, &data_key, "new contents").await;

    let target = FilesystemStorage::new(target_dir.path()).await.unwrap();
    create_markers(&target, StorageFormat::Normal).await.unwrap();
    write(&target, &data_key, "old contents").await;

    let engine = SyncEngine::new(
        &source,
        &target,
        None,
        options(CollisionResolutionMode::Terminate),
    );
    let report = engine.run().await.unwrap();
    assert!(report.has_problems());
    assert_eq!(read(&target, &data_key).await, Bytes::from("old contents"));
}

#[tokio::test]
async fn test_keep_existed_skips_without_error() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let source = new_source(source_dir.path(), &[PDB_DIR]).await;
    let data_key = format!("{PDB_DIR}/lib.pdb");
    write(&source, &data_key, "new contents").await;

    let target = FilesystemStorage::new(target_dir.path()).await.unwrap();
    create_markers(&target, StorageFormat::Normal).await.unwrap();
    write(&target, &data_key, "old contents").await;

    let engine = SyncEngine::new(
        &source,
        &target,
        None,
        options(CollisionResolutionMode::KeepExisted),
    );
    let report = engine.run().await.unwrap();
    assert!(!report.has_problems());
    assert_eq!(read(&target, &data_key).await, Bytes::from("old contents"));
}

#[tokio::test]
async fn test_overwrite_backs_up_then_replaces() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let backup_dir = tempfile::tempdir().unwrap();
    let source = new_source(source_dir.path(), &[PDB_DIR]).await;
    let data_key = format!("{PDB_DIR}/lib.pdb");
    write(&source, &data_key, "new contents").await;

    let target = FilesystemStorage::new(target_dir.path()).await.unwrap();
    create_markers(&target, StorageFormat::Normal).await.unwrap();
    // Same length, different bytes: forces the hash comparison.
    write(&target, &data_key, "old contents").await;
    let backup = FilesystemStorage::new(backup_dir.path()).await.unwrap();

    let engine = SyncEngine::new(
        &source,
        &target,
        Some(&backup),
        options(CollisionResolutionMode::Overwrite),
    );
    let report = engine.run().await.unwrap();
    assert!(!report.has_problems());
    assert_eq!(read(&target, &data_key).await, Bytes::from("new contents"));
    assert_eq!(read(&backup, &data_key).await, Bytes::from("old contents"));
}

#[tokio::test]
async fn test_overwrite_backup_is_durable_in_archive_store() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let backup_dir = tempfile::tempdir().unwrap();
    let source = new_source(source_dir.path(), &[PDB_DIR]).await;
    let data_key = format!("{PDB_DIR}/lib.pdb");
    write(&source, &data_key, "new contents").await;

    let target = FilesystemStorage::new(target_dir.path()).await.unwrap();
    create_markers(&target, StorageFormat::Normal).await.unwrap();
    write(&target, &data_key, "old contents").await;

    // A commit threshold the run never reaches: only the end-of-run flush
    // can make the backup container durable.
    let backup_path = backup_dir.path().join("backup.zip");
    let backup =
        ArchiveStorage::open(&backup_path, ArchiveAccess::Create, 2, u64::MAX).unwrap();

    let engine = SyncEngine::new(
        &source,
        &target,
        Some(&backup),
        options(CollisionResolutionMode::Overwrite),
    );
    let report = engine.run().await.unwrap();
    assert!(!report.has_problems());
    assert_eq!(read(&target, &data_key).await, Bytes::from("new contents"));

    // Reopened from disk, the container holds the replaced target content.
    let reopened =
        ArchiveStorage::open(&backup_path, ArchiveAccess::ReadOnly, 2, u64::MAX).unwrap();
    assert_eq!(
        reopened.read(&path(&data_key)).await.unwrap(),
        Bytes::from("old contents")
    );
}

#[tokio::test]
async fn test_overwrite_without_backup_store_is_an_error() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let source = new_source(source_dir.path(), &[PDB_DIR]).await;
    let data_key = format!("{PDB_DIR}/lib.pdb");
    write(&source, &data_key, "new contents").await;

    let target = FilesystemStorage::new(target_dir.path()).await.unwrap();
    create_markers(&target, StorageFormat::Normal).await.unwrap();
    write(&target, &data_key, "old contents").await;

    let engine = SyncEngine::new(
        &source,
        &target,
        None,
        options(CollisionResolutionMode::Overwrite),
    );
    let report = engine.run().await.unwrap();
    assert!(report.has_problems());
    assert_eq!(read(&target, &data_key).await, Bytes::from("old contents"));
}

#[tokio::test]
async fn test_overwrite_without_backup_replaces() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let source = new_source(source_dir.path(), &[PDB_DIR]).await;
    let data_key = format!("{PDB_DIR}/lib.pdb");
    write(&source, &data_key, "new contents").await;

    let target = FilesystemStorage::new(target_dir.path()).await.unwrap();
    create_markers(&target, StorageFormat::Normal).await.unwrap();
    write(&target, &data_key, "old contents").await;

    let engine = SyncEngine::new(
        &source,
        &target,
        None,
        options(CollisionResolutionMode::OverwriteWithoutBackup),
    );
    let report = engine.run().await.unwrap();
    assert!(!report.has_problems());
    assert_eq!(read(&target, &data_key).await, Bytes::from("new contents"));
}

#[tokio::test]
async fn test_weak_key_policy_override() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let source = new_source(source_dir.path(), &[PDB_DIR, WEAK_DIR]).await;
    let pdb_key = format!("{PDB_DIR}/lib.pdb");
    let weak_key = format!("{WEAK_DIR}/app.dll");
    write(&source, &pdb_key, "new contents").await;
    write(&source, &weak_key, "new contents").await;

    let target = FilesystemStorage::new(target_dir.path()).await.unwrap();
    create_markers(&target, StorageFormat::Normal).await.unwrap();
    write(&target, &pdb_key, "old contents").await;
    write(&target, &weak_key, "old contents").await;

    // Strong keys overwrite, weak keys keep the existing content.
    let engine = SyncEngine::new(
        &source,
        &target,
        None,
        SyncOptions {
            collision_mode: CollisionResolutionMode::OverwriteWithoutBackup,
            weak_key_collision_mode: Some(CollisionResolutionMode::KeepExisted),
            ..options(CollisionResolutionMode::Terminate)
        },
    );
    let report = engine.run().await.unwrap();
    assert!(!report.has_problems());
    assert_eq!(read(&target, &pdb_key).await, Bytes::from("new contents"));
    assert_eq!(read(&target, &weak_key).await, Bytes::from("old contents"));
}

#[tokio::test]
async fn test_invalid_source_aborts_run() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let source = new_source(source_dir.path(), &[PDB_DIR]).await;
    write(&source, &format!("{PDB_DIR}/lib.pdb"), "symbols").await;
    // An orphan makes source validation fail.
    write(&source, "orphan.pdb/aa11/orphan.pdb", "junk").await;
    let target = FilesystemStorage::new(target_dir.path()).await.unwrap();

    let engine = SyncEngine::new(
        &source,
        &target,
        None,
        options(CollisionResolutionMode::Terminate),
    );
    assert!(engine.run().await.is_err());
    // Nothing was copied.
    assert!(target.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_sync_renormalizes_for_lower_case_target() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let source = new_source(source_dir.path(), &[WEAK_DIR]).await;
    let weak_key = format!("{WEAK_DIR}/app.dll");
    write(&source, &weak_key, "image").await;
    let target = FilesystemStorage::new(target_dir.path()).await.unwrap();

    let engine = SyncEngine::new(
        &source,
        &target,
        None,
        SyncOptions {
            target_format: StorageFormat::LowerCase,
            ..options(CollisionResolutionMode::Terminate)
        },
    );
    let report = engine.run().await.unwrap();
    assert!(!report.has_problems());
    assert_eq!(
        read(&target, "app.dll/abcdef1234/app.dll").await,
        Bytes::from("image")
    );
}
