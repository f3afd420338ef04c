//! LZ4 compression codec for chunk payloads
//!
//! A thin, stateless boundary around `lz4_flex`. Each sealed chunk is
//! compressed exactly once before being written, and decompressed exactly
//! once per chunk read during restore. The encoded form carries a length
//! prefix so truncation or corruption is detected on decode.

use crate::error::{KeepsakeError, Result};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use tracing::trace;

/// Stateless compression codec
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressionCodec;

impl CompressionCodec {
    /// Create a new codec
    pub fn new() -> Self {
        CompressionCodec
    }

    /// Compress a raw chunk payload
    pub fn compress(&self, data: &[u8]) -> Vec<u8> {
        let compressed = compress_prepend_size(data);
        trace!(
            raw = data.len(),
            compressed = compressed.len(),
            "compressed chunk payload"
        );
        compressed
    }

    /// Decompress an encoded chunk payload
    ///
    /// Fails with [`KeepsakeError::Decompression`] when the stream is
    /// malformed or truncated.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        decompress_size_prepended(data)
            .map_err(|e| KeepsakeError::decompression(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let codec = CompressionCodec::new();
        let data = b"some repetitive data some repetitive data some repetitive data";
        let compressed = codec.compress(data);
        let decompressed = codec.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_empty_round_trip() {
        let codec = CompressionCodec::new();
        let compressed = codec.compress(&[]);
        assert!(codec.decompress(&compressed).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_stream_fails() {
        let codec = CompressionCodec::new();
        let compressed = codec.compress(&vec![42u8; 4096]);
        let truncated = &compressed[..compressed.len() / 2];
        let err = codec.decompress(truncated).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_garbage_stream_fails() {
        let codec = CompressionCodec::new();
        // Length prefix claims far more data than present
        let garbage = vec![0xFFu8; 16];
        assert!(codec.decompress(&garbage).is_err());
    }
}
