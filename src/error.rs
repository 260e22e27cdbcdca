//! Error types for the region entry store

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while storing, evicting or recalling entries
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Memory Errors
    // =========================================================================
    /// The off-heap arena cannot satisfy an allocation right now
    #[error("Off-heap memory exhausted: requested {requested} bytes, {available} available")]
    OutOfOffHeapMemory { requested: usize, available: usize },

    /// A mutating operation failed even after eviction was attempted
    #[error("Capacity exceeded for {requested} bytes: {reason}")]
    CapacityExceeded { requested: usize, reason: String },

    /// An allocation was used after its reference count reached zero
    #[error("Invalid off-heap handle {block} used by {operation}")]
    InvalidHandle {
        block: u64,
        operation: &'static str,
    },

    // =========================================================================
    // Entry Errors
    // =========================================================================
    /// The entry was destroyed by a concurrent remove; the caller should retry
    #[error("Entry was destroyed concurrently")]
    EntryDestroyed,

    /// The region was destroyed
    #[error("Region {0} has been destroyed")]
    RegionDestroyed(String),

    /// The region or entry is not configured for overflow eviction
    #[error("Not evictable: {0}")]
    NotEvictable(String),

    /// The key exists but its value could not be brought back from disk
    #[error("Recall failed for key {key}: {reason}")]
    RecallFailed { key: String, reason: String },

    // =========================================================================
    // Overflow Store Errors
    // =========================================================================
    /// The overflow store has no room for a value
    #[error("Overflow store full: requested {requested} bytes, capacity {capacity}")]
    DiskFull { requested: u64, capacity: u64 },

    /// A disk token does not (or no longer) address a slot
    #[error("Unknown disk token: {0}")]
    UnknownDiskToken(u64),

    /// A persisted slot failed validation on recall
    #[error("Corrupt overflow slot {token}: {reason}")]
    CorruptSlot { token: u64, reason: String },

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },
}

impl Error {
    /// Whether eviction can be expected to resolve this error.
    pub fn is_memory_pressure(&self) -> bool {
        matches!(self, Error::OutOfOffHeapMemory { .. })
    }

    /// Whether this is a programming-error class fault.
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, Error::InvalidHandle { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::OutOfOffHeapMemory {
            requested: 128,
            available: 64,
        };
        assert_eq!(
            err.to_string(),
            "Off-heap memory exhausted: requested 128 bytes, 64 available"
        );

        let err = Error::RecallFailed {
            key: "Long(7)".into(),
            reason: "disk gone".into(),
        };
        assert!(err.to_string().contains("Long(7)"));
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::OutOfOffHeapMemory {
            requested: 1,
            available: 0
        }
        .is_memory_pressure());
        assert!(!Error::DiskFull {
            requested: 1,
            capacity: 0
        }
        .is_memory_pressure());
        assert!(Error::InvalidHandle {
            block: 3,
            operation: "retain"
        }
        .is_invalid_handle());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
