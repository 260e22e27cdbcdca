//! In-memory overflow store

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;

use super::{DiskSlot, DiskToken, OverflowStats, OverflowStore};
use crate::compression::{CompressionAlgorithm, CompressionManager};
use crate::error::{Error, Result};

struct StoredSlot {
    key_hash: u64,
    version: u64,
    algorithm: CompressionAlgorithm,
    data: Bytes,
}

/// `DashMap`-backed store with a byte ceiling.
///
/// Persist and recall failures can be switched on to exercise error paths.
pub struct MemoryOverflowStore {
    slots: DashMap<u64, StoredSlot>,
    next_token: AtomicU64,
    capacity: u64,
    stored: AtomicU64,
    compression: CompressionManager,
    fail_persists: AtomicBool,
    fail_recalls: AtomicBool,
    persists: AtomicU64,
    recalls: AtomicU64,
    frees: AtomicU64,
}

impl MemoryOverflowStore {
    pub fn new(capacity: u64) -> Self {
        Self::with_compression(capacity, CompressionManager::disabled())
    }

    pub fn with_compression(capacity: u64, compression: CompressionManager) -> Self {
        Self {
            slots: DashMap::new(),
            next_token: AtomicU64::new(1),
            capacity,
            stored: AtomicU64::new(0),
            compression,
            fail_persists: AtomicBool::new(false),
            fail_recalls: AtomicBool::new(false),
            persists: AtomicU64::new(0),
            recalls: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        }
    }

    /// Make every subsequent persist fail with an I/O error
    pub fn fail_persists(&self, fail: bool) {
        self.fail_persists.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent recall fail with an I/O error
    pub fn fail_recalls(&self, fail: bool) {
        self.fail_recalls.store(fail, Ordering::SeqCst);
    }
}

impl OverflowStore for MemoryOverflowStore {
    fn persist(&self, key_hash: u64, version: u64, bytes: &[u8]) -> Result<DiskToken> {
        if self.fail_persists.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected persist failure",
            )));
        }

        let (data, algorithm) = self.compression.encode(bytes);
        let len = data.len() as u64;

        self.stored
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(len).filter(|&next| next <= self.capacity)
            })
            .map_err(|_| Error::DiskFull {
                requested: len,
                capacity: self.capacity,
            })?;

        let id = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.slots.insert(
            id,
            StoredSlot {
                key_hash,
                version,
                algorithm,
                data,
            },
        );
        self.persists.fetch_add(1, Ordering::Relaxed);
        Ok(DiskToken::new(id))
    }

    fn recall(&self, token: DiskToken) -> Result<DiskSlot> {
        if self.fail_recalls.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected recall failure",
            )));
        }

        let slot = self
            .slots
            .get(&token.id())
            .ok_or(Error::UnknownDiskToken(token.id()))?;
        let bytes = self.compression.decode(&slot.data, slot.algorithm)?;
        self.recalls.fetch_add(1, Ordering::Relaxed);

        Ok(DiskSlot {
            key_hash: slot.key_hash,
            version: slot.version,
            bytes,
        })
    }

    fn free(&self, token: DiskToken) -> Result<()> {
        let (_, slot) = self
            .slots
            .remove(&token.id())
            .ok_or(Error::UnknownDiskToken(token.id()))?;
        self.stored.fetch_sub(slot.data.len() as u64, Ordering::AcqRel);
        self.frees.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stats(&self) -> OverflowStats {
        OverflowStats {
            slots: self.slots.len(),
            stored_bytes: self.stored.load(Ordering::Acquire),
            capacity_bytes: self.capacity,
            persists: self.persists.load(Ordering::Relaxed),
            recalls: self.recalls.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
        }
    }
}
