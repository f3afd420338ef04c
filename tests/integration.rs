//! End-to-end tests exercising the full backup-to-restore pipeline

use keepsake::{
    chunk_file_name, BackupEngine, CatalogStore, ChangeCoordinator, ChangeKind, RestoreEngine,
    WatchConfig, DEFAULT_CHUNK_SIZE,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Pipeline {
    tree: TempDir,
    backup: TempDir,
    catalog: Arc<CatalogStore>,
}

impl Pipeline {
    fn new() -> Self {
        let tree = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let catalog = Arc::new(CatalogStore::open(backup.path()).unwrap());
        Pipeline {
            tree,
            backup,
            catalog,
        }
    }

    async fn full_backup(&self) -> keepsake::BackupSummary {
        let engine = BackupEngine::start(
            self.tree.path(),
            Arc::clone(&self.catalog),
            DEFAULT_CHUNK_SIZE,
        );
        let summary = engine.perform_full_backup().unwrap();
        engine.shutdown().await;
        summary
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backup_then_restore_round_trip() {
    let pipeline = Pipeline::new();
    std::fs::create_dir(pipeline.tree.path().join("docs")).unwrap();
    std::fs::write(pipeline.tree.path().join("readme.md"), "# project").unwrap();
    std::fs::write(pipeline.tree.path().join("docs/guide.md"), "guide text").unwrap();

    let summary = pipeline.full_backup().await;
    assert_eq!(summary.files_backed_up, 2);

    let target = TempDir::new().unwrap();
    let restore = RestoreEngine::open(pipeline.backup.path()).unwrap();
    let result = restore.restore_all(target.path()).unwrap();
    assert_eq!(result.files_restored, 2);
    assert_eq!(result.files_failed, 0);

    for rel in ["readme.md", "docs/guide.md"] {
        let original = std::fs::read(pipeline.tree.path().join(rel)).unwrap();
        let restored = std::fs::read(target.path().join(rel)).unwrap();
        assert_eq!(original, restored, "content mismatch for {}", rel);

        let original_mtime =
            keepsake::utils::file_modified_at(&pipeline.tree.path().join(rel)).unwrap();
        let restored_mtime =
            keepsake::utils::file_modified_at(&target.path().join(rel)).unwrap();
        assert_eq!(original_mtime, restored_mtime, "mtime mismatch for {}", rel);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn incompressible_content_round_trips() {
    use rand::RngCore;

    // Random bytes barely compress; the pipeline must not depend on
    // compression winning.
    let pipeline = Pipeline::new();
    let mut content = vec![0u8; 1024 * 1024];
    rand::rng().fill_bytes(&mut content);
    std::fs::write(pipeline.tree.path().join("noise.bin"), &content).unwrap();

    let summary = pipeline.full_backup().await;
    assert_eq!(summary.files_backed_up, 1);
    assert!(summary.bytes_compressed > 0);

    let target = TempDir::new().unwrap();
    let restore = RestoreEngine::open(pipeline.backup.path()).unwrap();
    let result = restore.restore_all(target.path()).unwrap();
    assert_eq!(result.files_failed, 0);
    assert_eq!(
        std::fs::read(target.path().join("noise.bin")).unwrap(),
        content
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chunk_bound_splits_large_batch() {
    // 2 MiB + 4 MiB cannot share a 5 MiB chunk: two chunk records result.
    let pipeline = Pipeline::new();
    std::fs::write(pipeline.tree.path().join("a.txt"), vec![b'a'; 2 * 1024 * 1024]).unwrap();
    std::fs::write(pipeline.tree.path().join("b.txt"), vec![b'b'; 4 * 1024 * 1024]).unwrap();

    let summary = pipeline.full_backup().await;
    assert_eq!(summary.files_backed_up, 2);
    assert_eq!(summary.chunks_written, 2);

    let snapshot = pipeline.catalog.snapshot();
    assert_eq!(snapshot.chunks.len(), 2);
    let a = &snapshot.files[&PathBuf::from("a.txt")];
    let b = &snapshot.files[&PathBuf::from("b.txt")];
    assert_ne!(a.placements[0].chunk_id, b.placements[0].chunk_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconcile_is_idempotent_and_tracks_deletes() {
    let pipeline = Pipeline::new();
    let a_path = pipeline.tree.path().join("a.txt");
    std::fs::write(&a_path, "first version").unwrap();

    pipeline.full_backup().await;

    // Nothing changed: reconcile must be empty
    let changes = pipeline.catalog.reconcile(pipeline.tree.path()).unwrap();
    assert!(changes.is_empty(), "unexpected changes: {:?}", changes);

    // Delete a.txt: exactly one DELETE event
    std::fs::remove_file(&a_path).unwrap();
    let changes = pipeline.catalog.reconcile(pipeline.tree.path()).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Delete);
    assert_eq!(changes[0].path, PathBuf::from("a.txt"));

    // Run the delete through a batch, then restore: a.txt must not appear
    pipeline.full_backup().await;
    let target = TempDir::new().unwrap();
    let restore = RestoreEngine::open(pipeline.backup.path()).unwrap();
    restore.restore_all(target.path()).unwrap();
    assert!(!target.path().join("a.txt").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_chunk_fails_only_dependent_files() {
    let pipeline = Pipeline::new();
    // Force separate chunks so only one file depends on the doomed chunk
    std::fs::write(pipeline.tree.path().join("a.txt"), vec![b'a'; 3 * 1024 * 1024]).unwrap();
    std::fs::write(pipeline.tree.path().join("b.txt"), vec![b'b'; 3 * 1024 * 1024]).unwrap();
    pipeline.full_backup().await;

    let snapshot = pipeline.catalog.snapshot();
    let a_chunk = snapshot.files[&PathBuf::from("a.txt")].placements[0].chunk_id;
    std::fs::remove_file(pipeline.backup.path().join(chunk_file_name(a_chunk))).unwrap();

    let engine = RestoreEngine::open(pipeline.backup.path()).unwrap();

    // validate() reports the missing chunk
    let err = engine.validate().unwrap_err();
    assert!(err.to_string().contains(&chunk_file_name(a_chunk)));

    // restore_all fails only the dependent file and restores the rest
    let target = TempDir::new().unwrap();
    let summary = engine.restore_all(target.path()).unwrap();
    assert_eq!(summary.files_restored, 1);
    assert_eq!(summary.files_failed, 1);
    assert!(!target.path().join("a.txt").exists());
    assert!(target.path().join("b.txt").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn catalog_survives_process_restart() {
    let pipeline = Pipeline::new();
    std::fs::write(pipeline.tree.path().join("persist.txt"), "stay with me").unwrap();
    pipeline.full_backup().await;

    // Chunk IDs continue from the persisted maximum after a reload
    let reloaded = Arc::new(CatalogStore::open(pipeline.backup.path()).unwrap());
    let next_id = reloaded.next_chunk_id();
    assert!(next_id >= 2);

    std::fs::write(pipeline.tree.path().join("later.txt"), "added after restart").unwrap();
    let engine = BackupEngine::start(pipeline.tree.path(), Arc::clone(&reloaded), DEFAULT_CHUNK_SIZE);
    engine.perform_full_backup().unwrap();
    engine.shutdown().await;

    let snapshot = reloaded.snapshot();
    let later = &snapshot.files[&PathBuf::from("later.txt")];
    assert!(later.placements[0].chunk_id >= next_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn live_watch_event_reaches_catalog() {
    let pipeline = Pipeline::new();
    let engine = BackupEngine::start(
        pipeline.tree.path(),
        Arc::clone(&pipeline.catalog),
        DEFAULT_CHUNK_SIZE,
    );

    let config = WatchConfig {
        debounce: Duration::from_millis(100),
        scan_interval: Duration::from_secs(3600),
        ..WatchConfig::default()
    };
    let (coordinator, mut events, _errors) =
        ChangeCoordinator::spawn(pipeline.tree.path(), config).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(pipeline.tree.path().join("live.txt"), "watched write").unwrap();

    // Forward events to the engine the way the CLI main loop does
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("watcher should deliver an event")
        .unwrap();
    engine.submit(vec![event]).await.unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while pipeline.catalog.file(Path::new("live.txt")).is_none() {
        assert!(
            std::time::Instant::now() < deadline,
            "live change never reached the catalog"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    coordinator.shutdown().await;
    engine.shutdown().await;

    let record = pipeline.catalog.file(Path::new("live.txt")).unwrap();
    assert_eq!(record.size, "watched write".len() as u64);
}
