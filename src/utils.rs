//! Utility functions shared across the Keepsake engines
//!
//! Content hashing (SHA-256), path relativization, and modification-time
//! helpers. All functions here are pure or operate on a single path; they
//! are thread-safe and can be called concurrently.

use crate::error::Result;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Hash a file's content using SHA-256
///
/// Reads the file in 8 KB blocks so large files never need to be held in
/// memory. Returns the hash as a 64-character hexadecimal string.
pub fn hash_file_content(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash arbitrary in-memory data using SHA-256
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Make `path` relative to `base`
///
/// Returns `None` when `path` does not live under `base`.
pub fn make_relative(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Read a file's modification time as a UTC timestamp
pub fn file_modified_at(path: &Path) -> Result<DateTime<Utc>> {
    let metadata = std::fs::metadata(path)?;
    Ok(metadata.modified()?.into())
}

/// Set a file's modification time from a UTC timestamp
pub fn set_file_modified(path: &Path, modified: DateTime<Utc>) -> Result<()> {
    let mtime = FileTime::from_system_time(modified.into());
    filetime::set_file_mtime(path, mtime)?;
    Ok(())
}

/// Format a byte count for human-readable display
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}
