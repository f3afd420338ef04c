//! Durable metadata catalog: per-file state and chunk inventory
//!
//! [`CatalogStore`] is the single owner of the in-memory [`Catalog`],
//! guarded by one read/write lock: many concurrent readers (listing,
//! validation) and one writer (the orchestrator during a batch).
//!
//! Persistence is a whole-catalog JSON document written to a temporary
//! file and atomically renamed into place, so a reader never observes a
//! partially written catalog and a crash mid-write leaves the previous
//! catalog intact. Mutations are durable only once `save()` has returned.

use crate::error::{KeepsakeError, Result};
use crate::types::{
    Catalog, ChangeEvent, ChangeKind, ChunkRecord, FileRecord, CATALOG_FILE_NAME,
};
use crate::utils::hash_file_content;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Thread-safe owner of the durable catalog
pub struct CatalogStore {
    backup_dir: PathBuf,
    inner: RwLock<Catalog>,
}

impl CatalogStore {
    /// Open (or create) the catalog for a backup directory
    ///
    /// The backup directory is created if needed. An absent catalog file
    /// is not an error; it means a fresh catalog.
    pub fn open(backup_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(backup_dir)?;

        let catalog_path = backup_dir.join(CATALOG_FILE_NAME);
        let catalog = match std::fs::read(&catalog_path) {
            Ok(bytes) => {
                let catalog: Catalog = serde_json::from_slice(&bytes)?;
                info!(
                    files = catalog.files.len(),
                    chunks = catalog.chunks.len(),
                    "loaded catalog from {}",
                    catalog_path.display()
                );
                catalog
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no catalog at {}, starting fresh", catalog_path.display());
                Catalog::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(CatalogStore {
            backup_dir: backup_dir.to_path_buf(),
            inner: RwLock::new(catalog),
        })
    }

    /// Directory holding the catalog file and chunk files
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Serialize the full catalog and atomically rename it into place
    pub fn save(&self) -> Result<()> {
        let json = {
            let mut catalog = self.inner.write();
            catalog.updated_at = Utc::now();
            serde_json::to_vec_pretty(&*catalog)?
        };

        let catalog_path = self.backup_dir.join(CATALOG_FILE_NAME);
        let tmp = NamedTempFile::new_in(&self.backup_dir)
            .map_err(|e| KeepsakeError::persistence(format!("temp file: {}", e)))?;
        std::fs::write(tmp.path(), &json)
            .map_err(|e| KeepsakeError::persistence(format!("write: {}", e)))?;
        tmp.persist(&catalog_path)
            .map_err(|e| KeepsakeError::persistence(format!("rename: {}", e)))?;

        debug!("saved catalog to {}", catalog_path.display());
        Ok(())
    }

    /// Clone the current catalog state
    pub fn snapshot(&self) -> Catalog {
        self.inner.read().clone()
    }

    /// Look up one file record
    pub fn file(&self, path: &Path) -> Option<FileRecord> {
        self.inner.read().files.get(path).cloned()
    }

    /// ID the next sealed chunk should carry
    pub fn next_chunk_id(&self) -> u64 {
        self.inner.read().max_chunk_id() + 1
    }

    /// Insert or replace a file record
    pub fn upsert_file(&self, record: FileRecord) {
        self.inner.write().files.insert(record.path.clone(), record);
    }

    /// Tombstone a file record; returns false when the path is unknown
    pub fn tombstone_file(&self, path: &Path) -> bool {
        let mut catalog = self.inner.write();
        match catalog.files.get_mut(path) {
            Some(record) => {
                record.deleted = true;
                true
            }
            None => false,
        }
    }

    /// Append a chunk record to the inventory
    ///
    /// Chunk IDs must be strictly increasing; a stale ID is a logic error
    /// in the caller and is rejected.
    pub fn append_chunk(&self, record: ChunkRecord) -> Result<()> {
        let mut catalog = self.inner.write();
        if record.id <= catalog.max_chunk_id() {
            return Err(KeepsakeError::persistence(format!(
                "chunk ID {} not greater than current maximum {}",
                record.id,
                catalog.max_chunk_id()
            )));
        }
        catalog.chunks.push(record);
        Ok(())
    }

    /// Walk the tree and derive the changes needed to bring the catalog
    /// up to date
    ///
    /// Every file found is hashed and compared against its record: an
    /// unknown or tombstoned path yields CREATE, a differing hash or
    /// mtime yields MODIFY, and a live record missing from the walk
    /// yields DELETE. Running it twice with no intervening filesystem
    /// change yields an empty list.
    pub fn reconcile(&self, root: &Path) -> Result<Vec<ChangeEvent>> {
        let mut on_disk: BTreeMap<PathBuf, (String, DateTime<Utc>)> = BTreeMap::new();

        for entry in WalkDir::new(root) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry during reconcile");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel_path = match entry.path().strip_prefix(root) {
                Ok(p) => p.to_path_buf(),
                Err(_) => continue,
            };
            let modified: DateTime<Utc> = match entry.metadata() {
                Ok(m) => match m.modified() {
                    Ok(t) => t.into(),
                    Err(e) => {
                        warn!(path = %rel_path.display(), error = %e, "no mtime, skipping");
                        continue;
                    }
                },
                Err(e) => {
                    warn!(path = %rel_path.display(), error = %e, "stat failed, skipping");
                    continue;
                }
            };
            let hash = match hash_file_content(entry.path()) {
                Ok(h) => h,
                Err(e) => {
                    warn!(path = %rel_path.display(), error = %e, "hash failed, skipping");
                    continue;
                }
            };
            on_disk.insert(rel_path, (hash, modified));
        }

        let catalog = self.inner.read();
        let mut changes = Vec::new();

        for (path, (hash, modified)) in &on_disk {
            match catalog.files.get(path) {
                Some(record) if !record.deleted => {
                    if &record.content_hash != hash || &record.modified != modified {
                        changes.push(ChangeEvent::now(path.clone(), ChangeKind::Modify));
                    }
                }
                // Unknown, or previously tombstoned and reappeared
                _ => changes.push(ChangeEvent::now(path.clone(), ChangeKind::Create)),
            }
        }

        for (path, record) in &catalog.files {
            if !record.deleted && !on_disk.contains_key(path) {
                changes.push(ChangeEvent::now(path.clone(), ChangeKind::Delete));
            }
        }

        debug!(changes = changes.len(), "reconciled against {}", root.display());
        Ok(changes)
    }
}
