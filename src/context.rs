//! Region context
//!
//! The capability object entries are created and mutated against: which
//! storage to use, whether to version, which compressor (if any), and where
//! to account memory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::compression::{CompressionAlgorithm, CompressionManager, Compressor};
use crate::config::RegionConfig;
use crate::disk::{FileOverflowStore, MemoryOverflowStore, OverflowStore};
use crate::error::{Error, Result};
use crate::eviction::MemoryUsage;
use crate::offheap::OffHeapArena;
use crate::stats::{NoopStats, StatisticsSink};

/// Capabilities a region hands to its entries
pub trait RegionContext: Send + Sync {
    /// Compressor for entry values; `None` stores values as given
    fn compressor(&self) -> Option<&dyn Compressor>;

    /// Off-heap arena, present iff off-heap storage is enabled
    fn off_heap(&self) -> Option<&OffHeapArena>;

    fn is_versioned(&self) -> bool;

    /// Whether entries overflow to disk under LRU eviction
    fn is_disk_lru(&self) -> bool;

    /// Store receiving evicted values
    fn overflow(&self) -> Option<&dyn OverflowStore>;

    /// Whether keys may be encoded inline
    fn inline_keys(&self) -> bool;

    fn memory(&self) -> &MemoryUsage;

    fn stats(&self) -> &dyn StatisticsSink;

    /// Next entry insertion sequence number
    fn next_sequence(&self) -> u64;
}

/// Concrete [`RegionContext`] built from a [`RegionConfig`] or by hand.
pub struct RegionAttributes {
    compressor: Option<Arc<dyn Compressor>>,
    arena: Option<OffHeapArena>,
    versioned: bool,
    disk_lru: bool,
    overflow: Option<Arc<dyn OverflowStore>>,
    inline_keys: bool,
    memory: MemoryUsage,
    stats: Arc<dyn StatisticsSink>,
    sequence: AtomicU64,
}

impl RegionAttributes {
    /// Heap storage, no versioning, no eviction, no compression
    pub fn heap_only() -> Self {
        Self {
            compressor: None,
            arena: None,
            versioned: false,
            disk_lru: false,
            overflow: None,
            inline_keys: true,
            memory: MemoryUsage::new(),
            stats: Arc::new(NoopStats),
            sequence: AtomicU64::new(0),
        }
    }

    /// Build the context a region with `config` runs against.
    pub fn from_config(config: &RegionConfig, stats: Arc<dyn StatisticsSink>) -> Result<Self> {
        config.validate()?;

        let arena = config
            .off_heap
            .enabled
            .then(|| OffHeapArena::with_stats(config.off_heap.capacity_bytes, Arc::clone(&stats)));

        let overflow = if config.is_disk_lru() {
            let overflow = &config.overflow;
            let compression =
                CompressionManager::new(overflow.compression, overflow.min_compress_bytes);
            let store: Arc<dyn OverflowStore> = match &overflow.directory {
                Some(dir) => Arc::new(FileOverflowStore::open(dir, overflow.max_bytes, compression)?),
                None => Arc::new(MemoryOverflowStore::with_compression(
                    overflow.max_bytes,
                    compression,
                )),
            };
            Some(store)
        } else {
            None
        };

        Ok(Self {
            compressor: config.compression.compressor(),
            arena,
            versioned: config.versioned,
            disk_lru: config.is_disk_lru(),
            overflow,
            inline_keys: config.inline_keys,
            memory: MemoryUsage::new(),
            stats,
            sequence: AtomicU64::new(0),
        })
    }

    /// Store values in a new arena of `capacity` bytes
    pub fn with_off_heap(mut self, capacity: usize) -> Self {
        self.arena = Some(OffHeapArena::with_stats(capacity, Arc::clone(&self.stats)));
        self
    }

    pub fn with_versioning(mut self) -> Self {
        self.versioned = true;
        self
    }

    /// Evict to an in-memory overflow store of `capacity` bytes
    pub fn with_disk_lru(self, capacity: u64) -> Self {
        self.with_overflow_store(Arc::new(MemoryOverflowStore::new(capacity)))
    }

    /// Evict to `store`
    pub fn with_overflow_store(mut self, store: Arc<dyn OverflowStore>) -> Self {
        self.disk_lru = true;
        self.overflow = Some(store);
        self
    }

    pub fn with_compression(mut self, algorithm: CompressionAlgorithm) -> Self {
        self.compressor = algorithm.compressor();
        self
    }

    pub fn without_inline_keys(mut self) -> Self {
        self.inline_keys = false;
        self
    }

    /// Replace the statistics sink. Call before `with_off_heap` so the arena
    /// reports to the same sink.
    pub fn with_stats(mut self, stats: Arc<dyn StatisticsSink>) -> Self {
        self.stats = stats;
        self
    }

    /// Arena, or a configuration error when off-heap storage is disabled
    pub fn require_off_heap(&self) -> Result<&OffHeapArena> {
        self.arena
            .as_ref()
            .ok_or_else(|| Error::Config("off-heap storage is not enabled".into()))
    }
}

impl RegionContext for RegionAttributes {
    fn compressor(&self) -> Option<&dyn Compressor> {
        self.compressor.as_deref()
    }

    fn off_heap(&self) -> Option<&OffHeapArena> {
        self.arena.as_ref()
    }

    fn is_versioned(&self) -> bool {
        self.versioned
    }

    fn is_disk_lru(&self) -> bool {
        self.disk_lru
    }

    fn overflow(&self) -> Option<&dyn OverflowStore> {
        self.overflow.as_deref()
    }

    fn inline_keys(&self) -> bool {
        self.inline_keys
    }

    fn memory(&self) -> &MemoryUsage {
        &self.memory
    }

    fn stats(&self) -> &dyn StatisticsSink {
        self.stats.as_ref()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}
