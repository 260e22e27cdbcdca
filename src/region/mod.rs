//! Region
//!
//! Ties the storage core together: entries are built by the factory,
//! published in a sharded map, tracked by the LRU controller and moved to the
//! overflow store under memory pressure.
//!
//! ```text
//!   put ──▶ EntryMap ──hit──▶ RegionEntry::update ─┐
//!              │                                   ├──▶ LruController::track
//!              └──miss─▶ RegionEntryFactory ───────┘          │
//!                                                   evict_if_needed
//!   get ──▶ EntryMap ──▶ read ──OnDisk──▶ LruController::recall
//! ```
//!
//! Off-heap allocation failures on put or recall trigger eviction and a
//! bounded number of retries before surfacing as
//! [`Error::CapacityExceeded`].

mod map;

pub use map::{EntryMap, DEFAULT_SHARDS};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::{EvictionConfig, RegionConfig};
use crate::context::{RegionAttributes, RegionContext};
use crate::disk::OverflowStats;
use crate::entry::{EntryRead, RegionEntry, RegionEntryFactory};
use crate::error::{Error, Result};
use crate::eviction::{EvictionPass, LruController};
use crate::key::RegionKey;
use crate::stats::{NoopStats, StatEvent, StatisticsSink};

/// Allocation attempts per operation, each after one round of eviction
const MAX_ALLOCATION_ATTEMPTS: usize = 4;

/// Result of [`Region::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    /// Whether the put created the entry
    pub created: bool,
    /// Version stamp after the put
    pub version: u64,
}

/// A value together with its version stamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Bytes,
    pub version: u64,
}

/// A named collection of entries sharing one [`RegionContext`]
pub struct Region {
    name: String,
    ctx: RegionAttributes,
    factory: RegionEntryFactory,
    entries: EntryMap,
    controller: Option<LruController>,
    destroyed: AtomicBool,
}

impl Region {
    /// Create a region from `config` without statistics
    pub fn new(config: RegionConfig) -> Result<Self> {
        Self::with_stats(config, Arc::new(NoopStats))
    }

    /// Create a region from `config`, reporting to `stats`
    pub fn with_stats(config: RegionConfig, stats: Arc<dyn StatisticsSink>) -> Result<Self> {
        let ctx = RegionAttributes::from_config(&config, stats)?;
        Ok(Self::with_attributes(config.name, ctx, &config.eviction))
    }

    /// Create a region over hand-built attributes.
    ///
    /// An LRU controller is set up when the attributes enable disk overflow.
    pub fn with_attributes(
        name: impl Into<String>,
        ctx: RegionAttributes,
        eviction: &EvictionConfig,
    ) -> Self {
        let name = name.into();
        let factory = RegionEntryFactory::for_context(&ctx);
        let controller = ctx
            .is_disk_lru()
            .then(|| LruController::new(eviction.limit, eviction.clock));

        info!(
            region = %name,
            off_heap = ctx.off_heap().is_some(),
            versioned = ctx.is_versioned(),
            disk_lru = ctx.is_disk_lru(),
            limit = ?eviction.limit,
            "region created"
        );

        Self {
            name,
            ctx,
            factory,
            entries: EntryMap::new(),
            controller,
            destroyed: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &RegionAttributes {
        &self.ctx
    }

    pub fn factory(&self) -> &RegionEntryFactory {
        &self.factory
    }

    pub fn controller(&self) -> Option<&LruController> {
        self.controller.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Heap plus off-heap bytes held by resident values
    pub fn memory_in_use(&self) -> usize {
        let off_heap = self.ctx.off_heap().map(|a| a.used()).unwrap_or(0);
        self.ctx.memory().heap_bytes() + off_heap
    }

    /// Off-heap bytes referenced by live entries.
    ///
    /// At quiescence this equals the arena's `used()`; any difference is a
    /// leak.
    pub fn resident_off_heap_bytes(&self) -> usize {
        self.entries.entries().iter().map(|e| e.off_heap_bytes()).sum()
    }

    pub fn resident_entries(&self) -> usize {
        self.ctx.memory().resident_entries()
    }

    pub fn overflow_stats(&self) -> Option<OverflowStats> {
        self.ctx.overflow().map(|store| store.stats())
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Store `value` under `key`.
    ///
    /// On failure the previous value, if any, is left in place.
    pub fn put(&self, key: impl Into<RegionKey>, value: impl Into<Bytes>) -> Result<PutOutcome> {
        let key = key.into();
        let value = value.into();
        let hash = key.identity_hash();

        let outcome = loop {
            self.check_live()?;

            if let Some(entry) = self.entries.get(&key, hash) {
                match self.with_room(|| entry.update(&self.ctx, &value)) {
                    Ok(version) => {
                        self.track(&entry);
                        break PutOutcome {
                            created: false,
                            version,
                        };
                    }
                    // removed under us; the next lookup misses
                    Err(Error::EntryDestroyed) => continue,
                    Err(e) => return Err(e),
                }
            }

            let entry = Arc::new(self.with_room(|| {
                self.factory
                    .create_entry(&self.ctx, key.clone(), value.clone())
            })?);

            if self.install(&entry, &key, hash)? {
                break PutOutcome {
                    created: true,
                    version: 1,
                };
            }
            // lost the race; release ours and update the winner
            entry.destroy(&self.ctx)?;
        };

        self.evict_if_needed();
        Ok(outcome)
    }

    /// Current value for `key`, recalling it from disk if needed.
    ///
    /// `Ok(None)` means the key is absent; an unreadable value fails with
    /// [`Error::RecallFailed`].
    pub fn get(&self, key: impl Into<RegionKey>) -> Result<Option<Bytes>> {
        Ok(self.get_versioned(key)?.map(|v| v.value))
    }

    /// Current value and version stamp for `key`
    pub fn get_versioned(&self, key: impl Into<RegionKey>) -> Result<Option<Versioned>> {
        self.check_live()?;
        let key = key.into();
        let Some(entry) = self.entries.get(&key, key.identity_hash()) else {
            return Ok(None);
        };

        match self.read_entry(&entry) {
            Ok(versioned) => Ok(Some(versioned)),
            Err(Error::EntryDestroyed) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Entry record for `key`, without touching recency
    pub fn get_entry(&self, key: impl Into<RegionKey>) -> Option<Arc<RegionEntry>> {
        let key = key.into();
        self.entries.get(&key, key.identity_hash())
    }

    pub fn contains_key(&self, key: impl Into<RegionKey>) -> bool {
        let key = key.into();
        self.entries.contains_key(&key, key.identity_hash())
    }

    /// Remove `key` and release everything its entry holds.
    pub fn remove(&self, key: impl Into<RegionKey>) -> Result<bool> {
        self.check_live()?;
        let key = key.into();
        let Some(entry) = self.entries.remove(&key, key.identity_hash()) else {
            return Ok(false);
        };

        if let Some(controller) = &self.controller {
            controller.untrack(&entry);
        }
        entry.destroy(&self.ctx)?;
        self.ctx.stats().record(StatEvent::EntryDestroyed);
        Ok(true)
    }

    /// Move the value for `key` to the overflow store now.
    ///
    /// Returns `false` when the key is absent or already on disk.
    pub fn evict(&self, key: impl Into<RegionKey>) -> Result<bool> {
        self.check_live()?;
        let key = key.into();
        let controller = self.controller.as_ref().ok_or_else(|| {
            Error::NotEvictable(format!("region {} has no overflow eviction", self.name))
        })?;

        match self.entries.get(&key, key.identity_hash()) {
            Some(entry) => controller.evict_entry(&self.ctx, &entry),
            None => Ok(false),
        }
    }

    /// Run an eviction pass if usage is above the configured limit
    pub fn evict_if_needed(&self) -> EvictionPass {
        match &self.controller {
            Some(controller) => controller.evict_if_needed(&self.ctx),
            None => EvictionPass::default(),
        }
    }

    /// Destroy every entry and tear down eviction state.
    ///
    /// Later operations fail with [`Error::RegionDestroyed`].
    pub fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(controller) = &self.controller {
            controller.clear();
        }

        let mut first_error = None;
        let drained = self.entries.drain();
        let count = drained.len();
        for entry in drained {
            match entry.destroy(&self.ctx) {
                Ok(()) => self.ctx.stats().record(StatEvent::EntryDestroyed),
                Err(e) => {
                    warn!(region = %self.name, key = %entry.key(), "failed to destroy entry: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(region = %self.name, entries = count, "region destroyed");
        first_error.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn check_live(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::RegionDestroyed(self.name.clone()));
        }
        Ok(())
    }

    fn track(&self, entry: &Arc<RegionEntry>) {
        if let Some(controller) = &self.controller {
            controller.track(entry);
        }
    }

    fn read_entry(&self, entry: &Arc<RegionEntry>) -> Result<Versioned> {
        match entry.read(&self.ctx)? {
            EntryRead::Value { value, version } => {
                if let Some(controller) = &self.controller {
                    controller.touch(entry);
                }
                Ok(Versioned { value, version })
            }
            EntryRead::OnDisk => {
                let controller = self.controller.as_ref().ok_or_else(|| {
                    Error::Internal(format!(
                        "key {} is on disk but region {} has no eviction controller",
                        entry.key(),
                        self.name
                    ))
                })?;
                let recalled = controller.recall(&self.ctx, entry)?;
                if recalled.from_disk {
                    self.evict_if_needed();
                }
                Ok(Versioned {
                    value: recalled.value,
                    version: recalled.version,
                })
            }
        }
    }

    /// Run `op`, evicting and retrying while the arena is full.
    /// Publish a freshly built entry.
    ///
    /// `Ok(false)` when another writer inserted the key first. Fails with
    /// [`Error::RegionDestroyed`] if teardown drained the map before the
    /// insert landed; the entry is taken back out and released.
    fn install(&self, entry: &Arc<RegionEntry>, key: &RegionKey, hash: u64) -> Result<bool> {
        if self.entries.insert_if_absent(Arc::clone(entry), key).is_err() {
            return Ok(false);
        }

        if self.is_destroyed() {
            if let Some(stale) = self.entries.remove(key, hash) {
                stale.destroy(&self.ctx)?;
            }
            entry.destroy(&self.ctx)?;
            return Err(Error::RegionDestroyed(self.name.clone()));
        }

        self.ctx.stats().record(StatEvent::EntryCreated);
        self.track(entry);
        Ok(true)
    }

    fn with_room<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut requested = 0;
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            match op() {
                Err(Error::OutOfOffHeapMemory { requested: r, .. }) => {
                    requested = r;
                    if let Some(capacity) = self.ctx.off_heap().map(|a| a.capacity()) {
                        if r > capacity {
                            return Err(Error::CapacityExceeded {
                                requested: r,
                                reason: format!(
                                    "value exceeds the {} byte off-heap arena of region {}",
                                    capacity, self.name
                                ),
                            });
                        }
                    }
                    let freed = self
                        .controller
                        .as_ref()
                        .map(|c| c.make_room(&self.ctx, r))
                        .unwrap_or_default();
                    if freed.is_empty() {
                        break;
                    }
                    debug!(region = %self.name, evicted = freed.evicted, "made room for allocation");
                }
                other => return other,
            }
        }

        Err(Error::CapacityExceeded {
            requested,
            reason: format!(
                "off-heap arena of region {} is full and nothing more can be evicted",
                self.name
            ),
        })
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            warn!(region = %self.name, "region teardown incomplete: {}", e);
        }
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
