//! Core data types used throughout the Keepsake library
//!
//! The durable catalog model ([`Catalog`], [`FileRecord`], [`ChunkRecord`],
//! [`ChunkPlacement`]) is what gets serialized to `catalog.json`; the
//! transient types ([`ChangeEvent`], [`WatchConfig`], summaries) only live
//! in memory.
//!
//! ## Catalog invariants
//!
//! - Every placement in any [`FileRecord`] resolves to a [`ChunkRecord`]
//!   present in `chunks`, and `offset + length <= chunk.raw_size`.
//! - Chunk IDs are strictly increasing and never reused.
//! - File records are never removed; deletions set `deleted = true` so
//!   restore history and chunk references stay consistent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Current on-disk catalog format version
pub const CATALOG_FORMAT_VERSION: u32 = 1;

/// Name of the persisted catalog file inside the backup directory
pub const CATALOG_FILE_NAME: &str = "catalog.json";

/// Default chunk size bound: 5 MiB of raw file bytes per chunk
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Deterministic file name for a chunk's compressed payload
pub fn chunk_file_name(id: u64) -> String {
    format!("chunk_{:06}.lz4", id)
}

/// Location of one file's bytes within a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlacement {
    /// ID of the chunk holding the bytes
    pub chunk_id: u64,
    /// Byte offset of the file's data within the chunk's raw payload
    pub offset: u64,
    /// Number of bytes belonging to the file
    pub length: u64,
}

/// Per-file state tracked by the catalog
///
/// One record exists per tracked path, created on the first observed
/// CREATE and mutated on MODIFY/DELETE. Records are tombstoned rather
/// than removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the watched tree root
    pub path: PathBuf,
    /// File size in bytes at last backup
    pub size: u64,
    /// Last modified timestamp at last backup
    pub modified: DateTime<Utc>,
    /// SHA-256 hash of the file content
    pub content_hash: String,
    /// Ordered placements locating the file's bytes in chunks
    pub placements: Vec<ChunkPlacement>,
    /// Whether the file has been deleted from the watched tree
    pub deleted: bool,
}

/// Inventory entry for one sealed chunk
///
/// Immutable once written; chunk files are never rewritten, only new
/// chunk IDs appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Monotonic, catalog-scoped chunk ID
    pub id: u64,
    /// File name of the compressed payload in the backup directory
    pub filename: String,
    /// Size of the raw (uncompressed) payload in bytes
    pub raw_size: u64,
    /// Size of the compressed payload in bytes
    pub compressed_size: u64,
    /// SHA-256 hash of the raw payload
    pub content_hash: String,
}

/// The durable source of truth: per-file state plus chunk inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    /// On-disk format version
    pub format_version: u32,
    /// When this catalog was first created
    pub created_at: DateTime<Utc>,
    /// When this catalog was last saved
    pub updated_at: DateTime<Utc>,
    /// Map of tree-relative path to file record
    pub files: BTreeMap<PathBuf, FileRecord>,
    /// Ordered chunk inventory, ascending by ID
    pub chunks: Vec<ChunkRecord>,
}

impl Catalog {
    /// Create a fresh, empty catalog
    pub fn new() -> Self {
        let now = Utc::now();
        Catalog {
            format_version: CATALOG_FORMAT_VERSION,
            created_at: now,
            updated_at: now,
            files: BTreeMap::new(),
            chunks: Vec::new(),
        }
    }

    /// Highest chunk ID currently in the inventory, or 0 when empty
    pub fn max_chunk_id(&self) -> u64 {
        self.chunks.iter().map(|c| c.id).max().unwrap_or(0)
    }

    /// Look up a chunk record by ID
    pub fn chunk(&self, id: u64) -> Option<&ChunkRecord> {
        self.chunks.iter().find(|c| c.id == id)
    }

    /// Iterate over non-tombstoned file records
    pub fn live_files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values().filter(|f| !f.deleted)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind of observed filesystem change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A path appeared that the catalog does not know (or knew as deleted)
    Create,
    /// A known path's content or mtime changed
    Modify,
    /// A known live path disappeared
    Delete,
    /// Reconciliation trigger from the periodic scan; carries no
    /// operation by itself
    Scan,
}

/// A debounced, deduplicated change notification
///
/// Transient only; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Path relative to the watched tree root
    pub path: PathBuf,
    /// Coalesced operation
    pub kind: ChangeKind,
    /// When the coordinator emitted the event
    pub observed_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Build an event observed now
    pub fn now(path: PathBuf, kind: ChangeKind) -> Self {
        ChangeEvent {
            path,
            kind,
            observed_at: Utc::now(),
        }
    }
}

/// Tuning knobs for the change coordinator
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Quiet period before a coalesced event is emitted
    pub debounce: Duration,
    /// Interval between periodic full scans; deliberately longer than the
    /// orchestrator's own refresh so the two sweeps stay independent
    pub scan_interval: Duration,
    /// Capacity of the outbound change-event channel
    pub event_capacity: usize,
    /// Capacity of the error-report channel
    pub error_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            debounce: Duration::from_millis(500),
            scan_interval: Duration::from_secs(600),
            event_capacity: 256,
            error_capacity: 16,
        }
    }
}

/// Result of one backup batch
#[derive(Debug, Clone, Default)]
pub struct BackupSummary {
    /// Number of files packed into chunks
    pub files_backed_up: usize,
    /// Number of files tombstoned
    pub files_deleted: usize,
    /// Number of chunk files written
    pub chunks_written: usize,
    /// Total raw bytes packed
    pub bytes_raw: u64,
    /// Total compressed bytes written
    pub bytes_compressed: u64,
}

/// Result of a restore run
#[derive(Debug, Clone, Default)]
pub struct RestoreSummary {
    /// Number of files fully restored
    pub files_restored: usize,
    /// Number of files that failed and were skipped
    pub files_failed: usize,
    /// Total bytes written to the target tree
    pub bytes_written: u64,
    /// Per-file warnings collected during the run
    pub warnings: Vec<String>,
}

/// Report produced by `verify`: validation outcome plus catalog statistics
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    /// Number of chunks in the inventory
    pub chunk_count: usize,
    /// Chunk file names that are missing from disk
    pub missing_chunks: Vec<String>,
    /// Number of live (non-tombstoned) files
    pub active_files: usize,
    /// Number of tombstoned files
    pub deleted_files: usize,
    /// Total raw bytes across all chunks
    pub total_raw_bytes: u64,
    /// Total compressed bytes across all chunks
    pub total_compressed_bytes: u64,
}

impl VerifyReport {
    /// Whether every cataloged chunk has a backing file on disk
    pub fn is_valid(&self) -> bool {
        self.missing_chunks.is_empty()
    }
}
