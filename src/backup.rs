//! Backup orchestrator: consumes change events, drives the packer and
//! codec, updates the catalog
//!
//! Each batch moves through a fixed sequence: group CREATE/MODIFY paths
//! apart from DELETE paths, pack the former into chunks, compress and
//! persist every chunk file, and only after all chunk writes succeed
//! append the chunk records, update file placements, and save the catalog
//! once. A mid-batch chunk-write failure aborts before any cataloging, so
//! the catalog on disk always reflects the last fully durable state.
//!
//! DELETE events tombstone the file record without touching chunks; chunk
//! files are append-only and never garbage collected.

use crate::catalog::CatalogStore;
use crate::chunker::Chunker;
use crate::compression::CompressionCodec;
use crate::error::{KeepsakeError, Result};
use crate::types::{
    chunk_file_name, BackupSummary, ChangeEvent, ChangeKind, ChunkPlacement, ChunkRecord,
    FileRecord,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the inbound batch channel; producers block past this
const BATCH_CHANNEL_CAPACITY: usize = 10;

/// Drives change events through packing, compression, and cataloging
pub struct BackupEngine {
    inner: Arc<EngineInner>,
    batch_tx: mpsc::Sender<Vec<ChangeEvent>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

struct EngineInner {
    watch_root: PathBuf,
    catalog: Arc<CatalogStore>,
    codec: CompressionCodec,
    chunk_size: u64,
    // One batch at a time; live batches and full backups must not interleave.
    batch_gate: Mutex<()>,
}

impl BackupEngine {
    /// Create an engine and start its batch-processing worker
    pub fn start(watch_root: &Path, catalog: Arc<CatalogStore>, chunk_size: u64) -> Self {
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        let inner = Arc::new(EngineInner {
            watch_root: watch_root.to_path_buf(),
            catalog,
            codec: CompressionCodec::new(),
            chunk_size,
            batch_gate: Mutex::new(()),
        });

        let worker = tokio::spawn(Self::batch_loop(
            Arc::clone(&inner),
            batch_rx,
            shutdown.clone(),
        ));

        BackupEngine {
            inner,
            batch_tx,
            worker: Mutex::new(Some(worker)),
            shutdown,
        }
    }

    /// Queue a batch of change events for processing
    ///
    /// Blocks when the channel is full. Returns
    /// [`KeepsakeError::ShuttingDown`] once shutdown has begun.
    pub async fn submit(&self, events: Vec<ChangeEvent>) -> Result<()> {
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(KeepsakeError::ShuttingDown),
            result = self.batch_tx.send(events) => {
                result.map_err(|_| KeepsakeError::ShuttingDown)
            }
        }
    }

    /// Reconcile the whole tree and run the result through one batch
    pub fn perform_full_backup(&self) -> Result<BackupSummary> {
        let changes = self.inner.catalog.reconcile(&self.inner.watch_root)?;
        info!(changes = changes.len(), "full backup reconciliation");
        self.inner.apply_batch(changes)
    }

    /// Stop accepting work and wait for the in-flight batch to finish
    pub async fn shutdown(self) {
        info!("backup engine shutting down");
        self.shutdown.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    async fn batch_loop(
        inner: Arc<EngineInner>,
        mut batch_rx: mpsc::Receiver<Vec<ChangeEvent>>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                batch = batch_rx.recv() => match batch {
                    Some(events) => {
                        if let Err(e) = inner.apply_batch(events) {
                            error!(error = %e, "batch failed; catalog keeps last durable state");
                        }
                    }
                    None => break,
                },
            }
        }
        debug!("batch loop stopped");
    }
}

impl EngineInner {
    /// Run one batch through the state machine
    ///
    /// Grouping -> Packing -> Compressing -> Persisting chunk bytes ->
    /// Cataloging -> Saving catalog.
    fn apply_batch(&self, events: Vec<ChangeEvent>) -> Result<BackupSummary> {
        let _exclusive = self.batch_gate.lock();

        let events = self.expand_scans(events)?;
        if events.is_empty() {
            return Ok(BackupSummary::default());
        }

        // Grouping: order-preserving, last event per path wins.
        let mut to_pack: Vec<PathBuf> = Vec::new();
        let mut to_delete: Vec<PathBuf> = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        for event in events.iter().rev() {
            if !seen.insert(event.path.clone()) {
                continue;
            }
            match event.kind {
                ChangeKind::Create | ChangeKind::Modify => to_pack.push(event.path.clone()),
                ChangeKind::Delete => to_delete.push(event.path.clone()),
                ChangeKind::Scan => {} // consumed by expand_scans
            }
        }
        to_pack.reverse();
        to_delete.reverse();

        let mut summary = BackupSummary::default();

        for path in &to_delete {
            if self.catalog.tombstone_file(path) {
                debug!(path = %path.display(), "tombstoned");
                summary.files_deleted += 1;
            } else {
                warn!(path = %path.display(), "delete for unknown path, ignoring");
            }
        }

        // Packing: the packer is seeded from the catalog's highest chunk
        // ID, so IDs stay unique across the catalog's lifetime.
        let mut chunker = Chunker::new(self.catalog.next_chunk_id(), self.chunk_size);
        let chunks = chunker.pack(&self.watch_root, &to_pack);

        // Compress and persist every chunk file before touching the
        // catalog. A write failure here leaves orphaned chunk files at
        // worst, never a catalog referencing missing data.
        let mut persisted: Vec<(ChunkRecord, &crate::chunker::PackedChunk)> = Vec::new();
        for chunk in &chunks {
            let compressed = self.codec.compress(&chunk.data);
            let filename = chunk_file_name(chunk.id);
            let chunk_path = self.catalog.backup_dir().join(&filename);
            std::fs::write(&chunk_path, &compressed)?;
            debug!(
                chunk = chunk.id,
                files = chunk.files.len(),
                raw = chunk.data.len(),
                compressed = compressed.len(),
                "wrote chunk file"
            );

            summary.chunks_written += 1;
            summary.bytes_raw += chunk.data.len() as u64;
            summary.bytes_compressed += compressed.len() as u64;

            persisted.push((
                ChunkRecord {
                    id: chunk.id,
                    filename,
                    raw_size: chunk.data.len() as u64,
                    compressed_size: compressed.len() as u64,
                    content_hash: chunk.content_hash.clone(),
                },
                chunk,
            ));
        }

        // Cataloging: inventory first, then per-file placements.
        for (record, chunk) in persisted {
            self.catalog.append_chunk(record)?;
            for slice in &chunk.files {
                self.catalog.upsert_file(FileRecord {
                    path: slice.path.clone(),
                    size: slice.length,
                    modified: slice.modified,
                    content_hash: slice.content_hash.clone(),
                    placements: vec![ChunkPlacement {
                        chunk_id: chunk.id,
                        offset: slice.offset,
                        length: slice.length,
                    }],
                    deleted: false,
                });
                summary.files_backed_up += 1;
            }
        }

        self.catalog.save()?;
        info!(
            files = summary.files_backed_up,
            deleted = summary.files_deleted,
            chunks = summary.chunks_written,
            "batch committed"
        );
        Ok(summary)
    }

    /// Replace Scan events with reconcile-derived changes
    ///
    /// Scan events carry no operation of their own; one or more of them in
    /// a batch triggers a full reconciliation whose output joins the batch.
    fn expand_scans(&self, events: Vec<ChangeEvent>) -> Result<Vec<ChangeEvent>> {
        if !events.iter().any(|e| e.kind == ChangeKind::Scan) {
            return Ok(events);
        }
        let mut expanded: Vec<ChangeEvent> = events
            .into_iter()
            .filter(|e| e.kind != ChangeKind::Scan)
            .collect();
        let derived = self.catalog.reconcile(&self.watch_root)?;
        debug!(derived = derived.len(), "scan events expanded via reconcile");
        expanded.extend(derived);
        Ok(expanded)
    }
}
