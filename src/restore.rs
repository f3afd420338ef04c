//! Restore engine: the inverse of the backup orchestrator
//!
//! Reconstructs files from the catalog's chunk placements. Each live file
//! is rebuilt by reading and decompressing every chunk it references
//! (cached per chunk ID within one run, since one chunk usually holds many
//! files), extracting exactly that file's recorded byte range, and
//! concatenating ranges in placement order. The reassembled bytes are
//! verified against the record's content hash before being written, and
//! the recorded modification time is restored afterwards.
//!
//! Restore is best-effort per file: one failing file is logged and skipped
//! without aborting the rest of the run.

use crate::catalog::CatalogStore;
use crate::chunker::extract;
use crate::compression::CompressionCodec;
use crate::error::{KeepsakeError, Result};
use crate::types::{Catalog, ChunkRecord, FileRecord, RestoreSummary, VerifyReport};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reconstructs tracked files from cataloged chunks
#[derive(Debug)]
pub struct RestoreEngine {
    backup_dir: PathBuf,
    catalog: Catalog,
    codec: CompressionCodec,
}

impl RestoreEngine {
    /// Load the catalog for a backup directory
    pub fn open(backup_dir: &Path) -> Result<Self> {
        if !backup_dir.is_dir() {
            return Err(KeepsakeError::config(format!(
                "backup path does not exist: {}",
                backup_dir.display()
            )));
        }
        let catalog = CatalogStore::open(backup_dir)?.snapshot();
        Ok(RestoreEngine {
            backup_dir: backup_dir.to_path_buf(),
            catalog,
            codec: CompressionCodec::new(),
        })
    }

    /// The loaded catalog snapshot
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Iterate over every file record, tombstones included
    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.catalog.files.values()
    }

    /// Confirm every cataloged chunk has a backing file on disk
    ///
    /// All missing chunk files are enumerated (and logged) before the
    /// validation error is returned, so one pass surfaces the full damage.
    pub fn validate(&self) -> Result<()> {
        let missing = self.missing_chunks();
        if missing.is_empty() {
            info!(chunks = self.catalog.chunks.len(), "backup validation passed");
            return Ok(());
        }
        Err(KeepsakeError::validation(format!(
            "{} chunk file(s) missing: {}",
            missing.len(),
            missing.join(", ")
        )))
    }

    fn missing_chunks(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for chunk in &self.catalog.chunks {
            let path = self.backup_dir.join(&chunk.filename);
            if !path.is_file() {
                warn!(chunk = chunk.id, file = %chunk.filename, "chunk file missing");
                missing.push(chunk.filename.clone());
            }
        }
        missing
    }

    /// Validate, then reconstruct every live file under `target`
    ///
    /// Restore is best-effort: missing chunks found during validation are
    /// recorded as warnings, and each affected file fails individually
    /// when its chunk is read. Per-file failures are logged, counted in
    /// the summary, and skipped; they never abort the run.
    pub fn restore_all(&self, target: &Path) -> Result<RestoreSummary> {
        std::fs::create_dir_all(target)?;

        let mut chunk_cache: HashMap<u64, Arc<Vec<u8>>> = HashMap::new();
        let mut summary = RestoreSummary::default();

        for filename in self.missing_chunks() {
            summary.warnings.push(format!("chunk file missing: {}", filename));
        }

        for record in self.catalog.live_files() {
            match self.restore_file(record, target, &mut chunk_cache) {
                Ok(bytes) => {
                    debug!(path = %record.path.display(), bytes, "restored");
                    summary.files_restored += 1;
                    summary.bytes_written += bytes;
                }
                Err(e) => {
                    warn!(path = %record.path.display(), error = %e, "failed to restore file");
                    summary.files_failed += 1;
                    summary
                        .warnings
                        .push(format!("{}: {}", record.path.display(), e));
                }
            }
        }

        info!(
            restored = summary.files_restored,
            failed = summary.files_failed,
            "restore run finished"
        );
        Ok(summary)
    }

    fn restore_file(
        &self,
        record: &FileRecord,
        target: &Path,
        chunk_cache: &mut HashMap<u64, Arc<Vec<u8>>>,
    ) -> Result<u64> {
        let target_path = target.join(&record.path);
        if let Some(parent) = target_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut bytes = Vec::with_capacity(record.size as usize);
        for placement in &record.placements {
            let chunk_record = self
                .catalog
                .chunk(placement.chunk_id)
                .ok_or(KeepsakeError::ChunkNotFound(placement.chunk_id))?;
            let payload = self.load_chunk(chunk_record, chunk_cache)?;
            let slice = extract(&payload, placement.offset, placement.length)?;
            bytes.extend_from_slice(slice);
        }

        // The reassembled bytes must hash to what the catalog recorded.
        let actual = crate::utils::hash_data(&bytes);
        if actual != record.content_hash {
            return Err(KeepsakeError::HashMismatch {
                expected: record.content_hash.clone(),
                actual,
            });
        }

        std::fs::write(&target_path, &bytes)?;
        if let Err(e) = crate::utils::set_file_modified(&target_path, record.modified) {
            warn!(path = %target_path.display(), error = %e, "failed to restore mtime");
        }

        Ok(bytes.len() as u64)
    }

    /// Read, decompress, and hash-verify a chunk, caching it for the run
    fn load_chunk(
        &self,
        record: &ChunkRecord,
        cache: &mut HashMap<u64, Arc<Vec<u8>>>,
    ) -> Result<Arc<Vec<u8>>> {
        if let Some(payload) = cache.get(&record.id) {
            return Ok(Arc::clone(payload));
        }

        let path = self.backup_dir.join(&record.filename);
        let compressed = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                KeepsakeError::ChunkFileMissing { path: path.clone() }
            } else {
                KeepsakeError::Io(e)
            }
        })?;
        let payload = self.codec.decompress(&compressed)?;

        let actual = crate::utils::hash_data(&payload);
        if actual != record.content_hash {
            return Err(KeepsakeError::HashMismatch {
                expected: record.content_hash.clone(),
                actual,
            });
        }

        let payload = Arc::new(payload);
        cache.insert(record.id, Arc::clone(&payload));
        Ok(payload)
    }

    /// Validation plus catalog statistics, for human-readable reporting
    pub fn verify(&self) -> VerifyReport {
        let missing_chunks = self.missing_chunks();
        let active_files = self.catalog.live_files().count();
        let deleted_files = self.catalog.files.len() - active_files;

        VerifyReport {
            chunk_count: self.catalog.chunks.len(),
            missing_chunks,
            active_files,
            deleted_files,
            total_raw_bytes: self.catalog.chunks.iter().map(|c| c.raw_size).sum(),
            total_compressed_bytes: self
                .catalog
                .chunks
                .iter()
                .map(|c| c.compressed_size)
                .sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{chunk_file_name, ChunkPlacement};
    use crate::utils::hash_data;
    use chrono::Utc;
    use tempfile::TempDir;

    /// Hand-build a backup directory with one chunk holding two files
    fn seeded_backup() -> (TempDir, Vec<u8>) {
        let backup = TempDir::new().unwrap();
        let codec = CompressionCodec::new();

        let a = b"alpha file contents".to_vec();
        let b = b"bravo file, somewhat longer contents".to_vec();
        let mut payload = a.clone();
        payload.extend_from_slice(&b);

        std::fs::write(
            backup.path().join(chunk_file_name(1)),
            codec.compress(&payload),
        )
        .unwrap();

        let store = CatalogStore::open(backup.path()).unwrap();
        store
            .append_chunk(ChunkRecord {
                id: 1,
                filename: chunk_file_name(1),
                raw_size: payload.len() as u64,
                compressed_size: 0,
                content_hash: hash_data(&payload),
            })
            .unwrap();
        for (name, data, offset) in [("a.txt", &a, 0u64), ("sub/b.txt", &b, a.len() as u64)] {
            store.upsert_file(FileRecord {
                path: PathBuf::from(name),
                size: data.len() as u64,
                modified: "2021-06-01T00:00:00Z".parse().unwrap(),
                content_hash: hash_data(data),
                placements: vec![ChunkPlacement {
                    chunk_id: 1,
                    offset,
                    length: data.len() as u64,
                }],
                deleted: false,
            });
        }
        store.save().unwrap();
        (backup, payload)
    }

    #[test]
    fn test_validate_passes_when_chunks_present() {
        let (backup, _) = seeded_backup();
        let engine = RestoreEngine::open(backup.path()).unwrap();
        engine.validate().unwrap();
        assert!(engine.verify().is_valid());
    }

    #[test]
    fn test_validate_enumerates_missing_chunks() {
        let (backup, _) = seeded_backup();
        std::fs::remove_file(backup.path().join(chunk_file_name(1))).unwrap();

        let engine = RestoreEngine::open(backup.path()).unwrap();
        let err = engine.validate().unwrap_err();
        assert!(err.to_string().contains(&chunk_file_name(1)));

        let report = engine.verify();
        assert!(!report.is_valid());
        assert_eq!(report.missing_chunks, vec![chunk_file_name(1)]);
    }

    #[test]
    fn test_restore_extracts_exact_ranges() {
        let (backup, _) = seeded_backup();
        let target = TempDir::new().unwrap();

        let engine = RestoreEngine::open(backup.path()).unwrap();
        let summary = engine.restore_all(target.path()).unwrap();

        assert_eq!(summary.files_restored, 2);
        assert_eq!(summary.files_failed, 0);
        assert_eq!(
            std::fs::read(target.path().join("a.txt")).unwrap(),
            b"alpha file contents"
        );
        assert_eq!(
            std::fs::read(target.path().join("sub/b.txt")).unwrap(),
            b"bravo file, somewhat longer contents"
        );
        // Recorded mtime is restored
        let modified = crate::utils::file_modified_at(&target.path().join("a.txt")).unwrap();
        assert_eq!(modified, "2021-06-01T00:00:00Z".parse::<chrono::DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_tombstoned_file_is_not_restored() {
        let (backup, _) = seeded_backup();
        let store = CatalogStore::open(backup.path()).unwrap();
        store.tombstone_file(Path::new("a.txt"));
        store.save().unwrap();

        let target = TempDir::new().unwrap();
        let engine = RestoreEngine::open(backup.path()).unwrap();
        let summary = engine.restore_all(target.path()).unwrap();

        assert_eq!(summary.files_restored, 1);
        assert!(!target.path().join("a.txt").exists());
        assert!(target.path().join("sub/b.txt").exists());
    }

    #[test]
    fn test_corrupt_chunk_fails_files_without_aborting_run() {
        let (backup, payload) = seeded_backup();

        // Rewrite the chunk with one flipped byte, valid LZ4 framing
        let mut tampered = payload;
        tampered[3] ^= 0xFF;
        std::fs::write(
            backup.path().join(chunk_file_name(1)),
            CompressionCodec::new().compress(&tampered),
        )
        .unwrap();

        let target = TempDir::new().unwrap();
        let engine = RestoreEngine::open(backup.path()).unwrap();
        let summary = engine.restore_all(target.path()).unwrap();

        // Chunk-level hash check fails both dependents, run still finishes
        assert_eq!(summary.files_restored, 0);
        assert_eq!(summary.files_failed, 2);
        assert_eq!(summary.warnings.len(), 2);
    }

    #[test]
    fn test_dangling_placement_fails_only_that_file() {
        let (backup, _) = seeded_backup();
        let store = CatalogStore::open(backup.path()).unwrap();
        let mut broken = store.file(Path::new("a.txt")).unwrap();
        broken.placements[0].chunk_id = 99;
        store.upsert_file(broken);
        store.save().unwrap();

        let target = TempDir::new().unwrap();
        let engine = RestoreEngine::open(backup.path()).unwrap();
        let summary = engine.restore_all(target.path()).unwrap();

        assert_eq!(summary.files_restored, 1);
        assert_eq!(summary.files_failed, 1);
        assert!(!target.path().join("a.txt").exists());
        assert!(target.path().join("sub/b.txt").exists());
    }

    #[test]
    fn test_missing_chunk_fails_dependents_only() {
        let (backup, _) = seeded_backup();
        let codec = CompressionCodec::new();

        // Second chunk holding a third, independent file
        let c = b"charlie lives alone in chunk two".to_vec();
        std::fs::write(backup.path().join(chunk_file_name(2)), codec.compress(&c)).unwrap();
        let store = CatalogStore::open(backup.path()).unwrap();
        store
            .append_chunk(ChunkRecord {
                id: 2,
                filename: chunk_file_name(2),
                raw_size: c.len() as u64,
                compressed_size: 0,
                content_hash: hash_data(&c),
            })
            .unwrap();
        store.upsert_file(FileRecord {
            path: PathBuf::from("c.txt"),
            size: c.len() as u64,
            modified: Utc::now(),
            content_hash: hash_data(&c),
            placements: vec![ChunkPlacement {
                chunk_id: 2,
                offset: 0,
                length: c.len() as u64,
            }],
            deleted: false,
        });
        store.save().unwrap();

        std::fs::remove_file(backup.path().join(chunk_file_name(1))).unwrap();

        let target = TempDir::new().unwrap();
        let engine = RestoreEngine::open(backup.path()).unwrap();
        let summary = engine.restore_all(target.path()).unwrap();

        // a.txt and sub/b.txt depended on chunk 1 and fail; c.txt survives
        assert_eq!(summary.files_restored, 1);
        assert_eq!(summary.files_failed, 2);
        assert!(target.path().join("c.txt").exists());
        assert!(!target.path().join("a.txt").exists());
        assert!(summary
            .warnings
            .iter()
            .any(|w| w.contains(&chunk_file_name(1))));
    }

    #[test]
    fn test_open_missing_backup_dir_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = RestoreEngine::open(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, KeepsakeError::InvalidConfiguration(_)));
    }
}
