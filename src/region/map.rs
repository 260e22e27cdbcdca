//! Sharded entry map
//!
//! Entries are bucketed by the identity hash of their key. The key itself
//! lives only inside the entry, so each bucket holds every entry whose key
//! shares the hash and lookups compare against the entry's own key encoding.
//!
//! - Each shard has its own RwLock, minimizing contention
//! - Power-of-2 shard count enables fast modulo via bitwise AND

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entry::RegionEntry;
use crate::key::RegionKey;

/// Default number of shards
pub const DEFAULT_SHARDS: usize = 64;

type Bucket = Vec<Arc<RegionEntry>>;

/// Concurrent map from key to entry
pub struct EntryMap {
    shards: Box<[RwLock<HashMap<u64, Bucket>>]>,
    mask: usize,
    count: AtomicUsize,
}

impl Default for EntryMap {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryMap {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Map with at least `shards` shards, rounded up to a power of two
    pub fn with_shards(shards: usize) -> Self {
        let n = shards.max(1).next_power_of_two();
        Self {
            shards: (0..n).map(|_| RwLock::new(HashMap::new())).collect(),
            mask: n - 1,
            count: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard(&self, hash: u64) -> &RwLock<HashMap<u64, Bucket>> {
        // shard on the high bits; the HashMap inside uses the low ones
        &self.shards[((hash >> 32) as usize) & self.mask]
    }

    pub fn get(&self, key: &RegionKey, hash: u64) -> Option<Arc<RegionEntry>> {
        let shard = self.shard(hash).read();
        shard
            .get(&hash)
            .and_then(|bucket| bucket.iter().find(|e| e.matches(key)))
            .cloned()
    }

    pub fn contains_key(&self, key: &RegionKey, hash: u64) -> bool {
        self.get(key, hash).is_some()
    }

    /// Publish `entry` unless its key is already present.
    ///
    /// Returns the entry already mapped when the insert loses.
    pub fn insert_if_absent(
        &self,
        entry: Arc<RegionEntry>,
        key: &RegionKey,
    ) -> Result<(), Arc<RegionEntry>> {
        let hash = entry.key_hash();
        let mut shard = self.shard(hash).write();
        let bucket = shard.entry(hash).or_default();

        // Double-check under write lock
        if let Some(existing) = bucket.iter().find(|e| e.matches(key)) {
            return Err(Arc::clone(existing));
        }

        bucket.push(entry);
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Unmap the entry for `key`
    pub fn remove(&self, key: &RegionKey, hash: u64) -> Option<Arc<RegionEntry>> {
        let mut shard = self.shard(hash).write();
        let bucket = shard.get_mut(&hash)?;
        let idx = bucket.iter().position(|e| e.matches(key))?;
        let removed = bucket.swap_remove(idx);
        if bucket.is_empty() {
            shard.remove(&hash);
        }
        self.count.fetch_sub(1, Ordering::Relaxed);
        Some(removed)
    }

    /// Unmap every entry and hand them back
    pub fn drain(&self) -> Vec<Arc<RegionEntry>> {
        let mut drained = Vec::new();
        for shard in self.shards.iter() {
            let mut guard = shard.write();
            for (_, bucket) in guard.drain() {
                self.count.fetch_sub(bucket.len(), Ordering::Relaxed);
                drained.extend(bucket);
            }
        }
        drained
    }

    /// Snapshot of all entries
    pub fn entries(&self) -> Vec<Arc<RegionEntry>> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .values()
                    .flat_map(|bucket| bucket.iter().cloned())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
