//! Disk Overflow Store
//!
//! Holds values evicted from memory. Each persisted value occupies one slot
//! addressed by a [`DiskToken`]; the token stays recallable until freed.
//!
//! ```text
//!   persist(key_hash, version, bytes) ──▶ DiskToken
//!   recall(token)                     ──▶ DiskSlot { key_hash, version, bytes }
//!   free(token)
//! ```
//!
//! Stores may compress slots internally; callers always get back the bytes they
//! persisted.

mod file;
mod memory;

pub use file::FileOverflowStore;
pub use memory::MemoryOverflowStore;

use std::fmt;

use bytes::Bytes;

use crate::error::Result;

/// Opaque address of a persisted value
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiskToken(u64);

impl DiskToken {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for DiskToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiskToken({})", self.0)
    }
}

/// Contents of a recalled slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSlot {
    /// Identity hash of the key that persisted the slot
    pub key_hash: u64,
    /// Version stamp at the time of eviction
    pub version: u64,
    /// The persisted bytes, decompressed
    pub bytes: Bytes,
}

/// Occupancy counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverflowStats {
    /// Live slots
    pub slots: usize,
    /// Bytes held by live slots, as stored
    pub stored_bytes: u64,
    /// Ceiling on stored bytes
    pub capacity_bytes: u64,
    pub persists: u64,
    pub recalls: u64,
    pub frees: u64,
}

/// Backing store for evicted values
pub trait OverflowStore: Send + Sync {
    /// Persist `bytes` and return the token addressing them.
    fn persist(&self, key_hash: u64, version: u64, bytes: &[u8]) -> Result<DiskToken>;

    /// Read a slot back. The slot stays allocated.
    fn recall(&self, token: DiskToken) -> Result<DiskSlot>;

    /// Release a slot. The token must not be used afterwards.
    fn free(&self, token: DiskToken) -> Result<()>;

    fn stats(&self) -> OverflowStats;
}
