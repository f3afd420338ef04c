//! # Keepsake - Continuous incremental directory backup
//!
//! Keepsake watches a directory tree, detects file creations,
//! modifications, and deletions, packs changed file contents into
//! fixed-size compressed chunks, and records a durable catalog mapping
//! files to the chunks that hold their bytes. Any tracked file can later
//! be reconstructed from that catalog.
//!
//! ## Architecture
//!
//! Leaf to root:
//!
//! - [`utils`]: content-addressed SHA-256 digests and path/mtime helpers
//! - [`compression`]: the LZ4 codec boundary, one compress per sealed
//!   chunk and one decompress per chunk read
//! - [`chunker`]: groups file contents into size-bounded chunks and
//!   records per-file byte ranges within each chunk
//! - [`watcher`]: turns raw OS notifications into a debounced,
//!   deduplicated stream of change events, plus a periodic full scan
//! - [`catalog`]: the durable source of truth with atomic save/load and
//!   tree reconciliation
//! - [`backup`]: the orchestrator consuming change events and driving
//!   packer, codec, and catalog
//! - [`restore`]: the inverse engine, rebuilding files from chunk byte
//!   ranges and restoring timestamps
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use keepsake::{BackupEngine, CatalogStore, RestoreEngine, DEFAULT_CHUNK_SIZE};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> keepsake::Result<()> {
//! // Back up a tree once
//! let catalog = Arc::new(CatalogStore::open(Path::new("./backup"))?);
//! let engine = BackupEngine::start(Path::new("./project"), Arc::clone(&catalog), DEFAULT_CHUNK_SIZE);
//! let summary = engine.perform_full_backup()?;
//! println!("backed up {} files", summary.files_backed_up);
//! engine.shutdown().await;
//!
//! // Restore it somewhere else
//! let restore = RestoreEngine::open(Path::new("./backup"))?;
//! let result = restore.restore_all(Path::new("./restored"))?;
//! println!("restored {} files", result.files_restored);
//! # Ok(())
//! # }
//! ```
//!
//! ## Durability model
//!
//! The catalog is serialized whole and written via temp-file-then-rename,
//! so a crash mid-write leaves the previous catalog intact. Chunk files
//! are append-only: superseded data is never compacted or collected, and
//! no content deduplication is performed across files or generations.
//! The periodic full scan, not retries, is the self-healing mechanism for
//! events missed due to transient errors.

pub mod backup;
pub mod catalog;
pub mod chunker;
pub mod compression;
pub mod error;
pub mod restore;
pub mod types;
pub mod utils;
pub mod watcher;

// Re-export main types for convenience
pub use backup::BackupEngine;
pub use catalog::CatalogStore;
pub use chunker::{extract, extract_verified, Chunker, FileSlice, PackedChunk};
pub use compression::CompressionCodec;
pub use error::{KeepsakeError, Result};
pub use restore::RestoreEngine;
pub use types::{
    chunk_file_name, BackupSummary, Catalog, ChangeEvent, ChangeKind, ChunkPlacement,
    ChunkRecord, FileRecord, RestoreSummary, VerifyReport, WatchConfig, DEFAULT_CHUNK_SIZE,
};
pub use watcher::ChangeCoordinator;
