// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Byte-stream compression of flush payloads.

use std::fmt;
use std::io::{self, Read};

/// Compresses a whole payload in one go.
pub trait Compressor: fmt::Debug + Send + Sync {
    /// Compress `data`, returning the compressed bytes.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, io::Error>;
}

/// Gzip compression, which is what the intake expects for `.gz` payloads.
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: flate2::Compression,
}

impl GzipCompressor {
    /// A gzip compressor using the given level (clamped to 0-9).
    pub fn with_level(level: u32) -> Self {
        GzipCompressor {
            level: flate2::Compression::new(level.min(9)),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        GzipCompressor {
            level: flate2::Compression::default(),
        }
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, io::Error> {
        let mut encoder = flate2::read::GzEncoder::new(data, self.level);
        let mut compressed = Vec::new();
        encoder.read_to_end(&mut compressed)?;
        Ok(compressed)
    }
}

/// Inverse of [`GzipCompressor::compress`].
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, io::Error> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_round_trip() {
        let data = b"dummy pprof data".repeat(100);
        let compressed = GzipCompressor::default().compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        // gzip magic
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
        assert_eq!(gunzip(&compressed).unwrap(), data);
    }

    #[test]
    fn test_gzip_empty_input() {
        let compressed = GzipCompressor::with_level(1).compress(b"").unwrap();
        assert!(!compressed.is_empty());
        assert_eq!(gunzip(&compressed).unwrap(), b"");
    }

    #[test]
    fn test_gunzip_rejects_garbage() {
        gunzip(b"definitely not gzip").unwrap_err();
    }
}
