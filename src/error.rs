//! Error types for the Keepsake library
//!
//! All fallible operations return [`Result<T>`]. The error taxonomy follows
//! how failures are handled by the engines: transient I/O problems are
//! skipped per item by the caller, integrity failures abort only the
//! affected file or extraction, persistence failures abort the current
//! batch, and configuration errors are fatal at startup.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Keepsake library
pub type Result<T> = std::result::Result<T, KeepsakeError>;

/// Main error type for all Keepsake operations
#[derive(Debug, Error)]
pub enum KeepsakeError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization of the catalog
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors from the OS file notification backend
    #[error("Watch error: {0}")]
    Notify(#[from] notify::Error),

    /// Walk directory error from the walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Decompression errors (malformed or truncated chunk stream)
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Hash mismatch during extraction or restore
    #[error("Hash mismatch - expected: {expected}, actual: {actual}")]
    HashMismatch {
        /// Expected hash value
        expected: String,
        /// Actual computed hash value
        actual: String,
    },

    /// A requested byte range extends past the end of a chunk
    #[error("Range {offset}+{length} extends beyond chunk boundary ({chunk_len} bytes)")]
    ChunkBoundary {
        /// Start of the requested range
        offset: u64,
        /// Length of the requested range
        length: u64,
        /// Total length of the chunk payload
        chunk_len: u64,
    },

    /// A placement references a chunk ID missing from the catalog
    #[error("Chunk {0} not found in catalog")]
    ChunkNotFound(u64),

    /// A cataloged chunk's backing file is missing from disk
    #[error("Chunk file missing: {path:?}")]
    ChunkFileMissing {
        /// Expected path of the chunk file
        path: PathBuf,
    },

    /// Backup validation failed
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Restore operation failed for a specific file
    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    /// Catalog persistence (write/rename) failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The engine is shutting down and no longer accepts work
    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl KeepsakeError {
    /// Create a decompression error with a custom message
    pub fn decompression(msg: impl Into<String>) -> Self {
        KeepsakeError::Decompression(msg.into())
    }

    /// Create a validation error with a custom message
    pub fn validation(msg: impl Into<String>) -> Self {
        KeepsakeError::ValidationFailed(msg.into())
    }

    /// Create a restore error with a custom message
    pub fn restore(msg: impl Into<String>) -> Self {
        KeepsakeError::RestoreFailed(msg.into())
    }

    /// Create a persistence error with a custom message
    pub fn persistence(msg: impl Into<String>) -> Self {
        KeepsakeError::Persistence(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        KeepsakeError::InvalidConfiguration(msg.into())
    }

    /// Check if this error indicates corrupted or tampered data
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            KeepsakeError::HashMismatch { .. }
                | KeepsakeError::Decompression(_)
                | KeepsakeError::ChunkBoundary { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KeepsakeError::ChunkNotFound(42);
        assert_eq!(err.to_string(), "Chunk 42 not found in catalog");
    }

    #[test]
    fn test_error_integrity() {
        assert!(KeepsakeError::HashMismatch {
            expected: "abc".to_string(),
            actual: "def".to_string(),
        }
        .is_integrity());
        assert!(KeepsakeError::decompression("truncated").is_integrity());
        assert!(!KeepsakeError::ShuttingDown.is_integrity());
    }
}
