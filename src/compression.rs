//! Value Compression
//!
//! The compressor capability consumed by entries and the overflow store.
//! Entries only remember *that* a value is compressed; the algorithm comes from
//! the region context. Overflow slots record the algorithm per slot.
//!
//! # Example
//!
//! ```
//! use regionstore::compression::{CompressionAlgorithm, CompressionManager};
//!
//! let manager = CompressionManager::new(CompressionAlgorithm::Lz4, 16);
//!
//! let data = b"abcabcabcabcabcabcabcabcabcabcabcabcabcabc";
//! let (packed, algorithm) = manager.encode(data);
//! assert_eq!(algorithm, CompressionAlgorithm::Lz4);
//!
//! let restored = manager.decode(&packed, algorithm).unwrap();
//! assert_eq!(restored.as_ref(), data);
//! ```

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    #[default]
    None,
    /// LZ4 block compression
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// One-byte tag stored in overflow slot headers
    pub fn tag(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
        }
    }

    /// Inverse of [`tag`](Self::tag)
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Lz4),
            _ => None,
        }
    }

    /// Compressor implementing this algorithm, or `None` for pass-through.
    pub fn compressor(&self) -> Option<Arc<dyn Compressor>> {
        match self {
            CompressionAlgorithm::None => None,
            CompressionAlgorithm::Lz4 => Some(Arc::new(Lz4Compressor::new())),
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Pluggable compressor capability
pub trait Compressor: Send + Sync {
    /// Algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through compressor
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// LZ4 compressor (fast, size-prefixed blocks)
pub struct Lz4Compressor {
    acceleration: i32,
}

impl Lz4Compressor {
    /// Create with the default acceleration
    pub fn new() -> Self {
        Self { acceleration: 1 }
    }

    /// Create with a custom acceleration (higher = faster, larger output)
    pub fn with_acceleration(acceleration: i32) -> Self {
        Self {
            acceleration: acceleration.max(1),
        }
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::FAST(self.acceleration)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "lz4".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "lz4".into(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Size-gated compression with fallback to raw bytes.
///
/// Used by overflow stores, which record the algorithm actually applied.
pub struct CompressionManager {
    algorithm: CompressionAlgorithm,
    min_size_bytes: usize,
    compressor: Option<Arc<dyn Compressor>>,
}

impl CompressionManager {
    /// Create a manager compressing values of at least `min_size_bytes`.
    pub fn new(algorithm: CompressionAlgorithm, min_size_bytes: usize) -> Self {
        Self {
            algorithm,
            min_size_bytes,
            compressor: algorithm.compressor(),
        }
    }

    /// Manager that never compresses
    pub fn disabled() -> Self {
        Self::new(CompressionAlgorithm::None, usize::MAX)
    }

    /// Configured algorithm
    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    /// Compress `data` if worthwhile.
    ///
    /// Returns the stored bytes and the algorithm that was actually applied.
    /// Falls back to raw bytes when the value is small, compression fails, or
    /// the output does not shrink.
    pub fn encode(&self, data: &[u8]) -> (Bytes, CompressionAlgorithm) {
        let compressor = match &self.compressor {
            Some(c) if data.len() >= self.min_size_bytes => c,
            _ => return (Bytes::copy_from_slice(data), CompressionAlgorithm::None),
        };

        match compressor.compress(data) {
            Ok(compressed) if compressed.len() < data.len() => {
                (Bytes::from(compressed), self.algorithm)
            }
            Ok(_) => (Bytes::copy_from_slice(data), CompressionAlgorithm::None),
            Err(e) => {
                tracing::warn!("Compression with {} failed, storing raw: {}", self.algorithm, e);
                (Bytes::copy_from_slice(data), CompressionAlgorithm::None)
            }
        }
    }

    /// Reverse [`encode`](Self::encode) given the recorded algorithm.
    pub fn decode(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        match algorithm {
            CompressionAlgorithm::None => Ok(Bytes::copy_from_slice(data)),
            CompressionAlgorithm::Lz4 => {
                let restored = match &self.compressor {
                    Some(c) if c.algorithm() == algorithm => c.decompress(data)?,
                    _ => Lz4Compressor::new().decompress(data)?,
                };
                Ok(Bytes::from(restored))
            }
        }
    }
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::disabled()
    }
}
