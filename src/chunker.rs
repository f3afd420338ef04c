//! Chunk packer: groups file contents into size-bounded chunks
//!
//! The packer concatenates whole files into a chunk until adding the next
//! file would push the chunk past its size bound, at which point the chunk
//! is sealed (its content hash computed) and a new one opened. A file is
//! never split across chunks; a file larger than the bound simply becomes
//! its own chunk. Per-file byte ranges within each chunk are recorded so
//! restore can extract exactly one file's bytes.
//!
//! Chunk IDs come from a packer-local counter seeded from the catalog's
//! highest known chunk ID, which keeps IDs globally unique for the
//! catalog's lifetime.

use crate::error::{KeepsakeError, Result};
use crate::utils::hash_data;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One file's byte range inside a packed chunk
#[derive(Debug, Clone, PartialEq)]
pub struct FileSlice {
    /// Path relative to the watched tree root
    pub path: PathBuf,
    /// Byte offset within the chunk's raw payload
    pub offset: u64,
    /// Number of bytes belonging to the file
    pub length: u64,
    /// SHA-256 hash of the file's bytes
    pub content_hash: String,
    /// Modification time captured when the file was read
    pub modified: DateTime<Utc>,
}

/// A sealed chunk awaiting compression and persistence
#[derive(Debug, Clone)]
pub struct PackedChunk {
    /// Catalog-scoped chunk ID
    pub id: u64,
    /// Concatenated raw file bytes
    pub data: Vec<u8>,
    /// Per-file ranges within `data`
    pub files: Vec<FileSlice>,
    /// SHA-256 hash of `data`
    pub content_hash: String,
}

/// Groups file contents into size-bounded chunks
#[derive(Debug)]
pub struct Chunker {
    next_id: u64,
    chunk_size: u64,
}

impl Chunker {
    /// Create a packer that will assign IDs starting at `next_id`
    pub fn new(next_id: u64, chunk_size: u64) -> Self {
        Chunker {
            next_id,
            chunk_size,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Pack the given tree-relative paths into chunks
    ///
    /// Paths are processed in input order. Files that cannot be stat'd or
    /// read are logged and skipped; they never fail the batch. Directories
    /// are ignored.
    pub fn pack(&mut self, root: &Path, paths: &[PathBuf]) -> Vec<PackedChunk> {
        let mut chunks = Vec::new();
        let mut current = OpenChunk::new(self.allocate_id());

        for rel_path in paths {
            let full_path = root.join(rel_path);

            let metadata = match std::fs::metadata(&full_path) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %full_path.display(), error = %e, "skipping unreadable path");
                    continue;
                }
            };
            if metadata.is_dir() {
                continue;
            }

            // Seal before adding a file that would overflow the bound.
            // An oversized file still lands alone in its own chunk.
            if !current.files.is_empty()
                && current.data.len() as u64 + metadata.len() > self.chunk_size
            {
                chunks.push(current.seal());
                current = OpenChunk::new(self.allocate_id());
            }

            let bytes = match std::fs::read(&full_path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %full_path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };
            let modified: DateTime<Utc> = match metadata.modified() {
                Ok(t) => t.into(),
                Err(e) => {
                    warn!(path = %full_path.display(), error = %e, "skipping file without mtime");
                    continue;
                }
            };

            current.add(rel_path.clone(), bytes, modified);
        }

        if !current.files.is_empty() {
            chunks.push(current.seal());
        } else {
            // Unused trailing ID; hand it back so IDs stay dense.
            self.next_id -= 1;
        }

        debug!(chunks = chunks.len(), "packed input paths");
        chunks
    }
}

/// Chunk under construction
struct OpenChunk {
    id: u64,
    data: Vec<u8>,
    files: Vec<FileSlice>,
}

impl OpenChunk {
    fn new(id: u64) -> Self {
        OpenChunk {
            id,
            data: Vec::new(),
            files: Vec::new(),
        }
    }

    fn add(&mut self, path: PathBuf, bytes: Vec<u8>, modified: DateTime<Utc>) {
        let offset = self.data.len() as u64;
        let length = bytes.len() as u64;
        let content_hash = hash_data(&bytes);
        self.data.extend_from_slice(&bytes);
        self.files.push(FileSlice {
            path,
            offset,
            length,
            content_hash,
            modified,
        });
    }

    fn seal(self) -> PackedChunk {
        let content_hash = hash_data(&self.data);
        PackedChunk {
            id: self.id,
            data: self.data,
            files: self.files,
            content_hash,
        }
    }
}

/// Extract a byte range from a raw chunk payload
///
/// Fails with [`KeepsakeError::ChunkBoundary`] when the range extends past
/// the end of the payload.
pub fn extract(chunk: &[u8], offset: u64, length: u64) -> Result<&[u8]> {
    let end = offset
        .checked_add(length)
        .ok_or(KeepsakeError::ChunkBoundary {
            offset,
            length,
            chunk_len: chunk.len() as u64,
        })?;
    if end > chunk.len() as u64 {
        return Err(KeepsakeError::ChunkBoundary {
            offset,
            length,
            chunk_len: chunk.len() as u64,
        });
    }
    Ok(&chunk[offset as usize..end as usize])
}

/// Extract a byte range and verify it against a recorded hash
///
/// Fails with [`KeepsakeError::HashMismatch`] when the recomputed hash of
/// the slice differs from `expected_hash`.
pub fn extract_verified<'a>(
    chunk: &'a [u8],
    offset: u64,
    length: u64,
    expected_hash: &str,
) -> Result<&'a [u8]> {
    let slice = extract(chunk, offset, length)?;
    let actual = hash_data(slice);
    if actual != expected_hash {
        return Err(KeepsakeError::HashMismatch {
            expected: expected_hash.to_string(),
            actual,
        });
    }
    Ok(slice)
}
