//! LRU eviction controller

use std::sync::Arc;

use tracing::{debug, warn};

use super::{EvictionContext, EvictionLimit, RecencyClock};
use crate::context::RegionContext;
use crate::entry::{EvictOutcome, Recalled, RegionEntry};
use crate::error::{Error, Result};
use crate::stats::StatEvent;

/// Recall attempts that may each trigger one round of eviction
const MAX_RECALL_ATTEMPTS: usize = 4;

/// Summary of one eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPass {
    pub evicted: usize,
    pub bytes_freed: usize,
    /// Candidates held by another thread
    pub skipped_busy: usize,
    /// Candidates whose persist failed
    pub failed: usize,
}

impl EvictionPass {
    pub fn is_empty(&self) -> bool {
        self.evicted == 0
    }
}

/// Decides what to evict and drives tier transitions
pub struct LruController {
    eviction: EvictionContext,
}

impl LruController {
    pub fn new(limit: EvictionLimit, clock: RecencyClock) -> Self {
        Self {
            eviction: EvictionContext::new(limit, clock),
        }
    }

    pub fn eviction_context(&self) -> &EvictionContext {
        &self.eviction
    }

    /// Start tracking a resident entry as most recently used
    pub fn track(&self, entry: &Arc<RegionEntry>) {
        self.eviction.lru().insert(entry, self.eviction.stamp());
    }

    /// Record an access
    pub fn touch(&self, entry: &RegionEntry) {
        self.eviction.lru().touch(entry, self.eviction.stamp());
    }

    pub fn untrack(&self, entry: &RegionEntry) {
        self.eviction.lru().remove(entry);
    }

    pub fn is_over_limit(&self, ctx: &dyn RegionContext) -> bool {
        self.eviction.is_over_limit(ctx.memory(), ctx.off_heap())
    }

    /// Evict least recently used entries until usage is back under the limit.
    pub fn evict_if_needed(&self, ctx: &dyn RegionContext) -> EvictionPass {
        if !self.is_over_limit(ctx) {
            return EvictionPass::default();
        }
        let pass = self.run_pass(ctx, || !self.is_over_limit(ctx));
        if !pass.is_empty() {
            debug!(
                evicted = pass.evicted,
                bytes = pass.bytes_freed,
                skipped = pass.skipped_busy,
                failed = pass.failed,
                "eviction pass complete"
            );
        }
        pass
    }

    /// Evict until the arena can hold `bytes` more, or nothing is left.
    ///
    /// A request larger than the whole arena evicts nothing.
    pub fn make_room(&self, ctx: &dyn RegionContext, bytes: usize) -> EvictionPass {
        match ctx.off_heap() {
            Some(arena) if bytes <= arena.capacity() => {
                self.run_pass(ctx, || arena.available() >= bytes)
            }
            _ => EvictionPass::default(),
        }
    }

    /// Evict one specific entry, waiting for its lock.
    ///
    /// Returns `false` when the value was not resident.
    pub fn evict_entry(&self, ctx: &dyn RegionContext, entry: &Arc<RegionEntry>) -> Result<bool> {
        self.untrack(entry);
        match entry.evict(ctx) {
            EvictOutcome::Evicted(_) => Ok(true),
            EvictOutcome::NotResident | EvictOutcome::Busy => Ok(false),
            EvictOutcome::Failed(e) => {
                ctx.stats().record(StatEvent::EvictionFailed);
                if !entry.is_destroyed() {
                    self.track(entry);
                }
                Err(e)
            }
        }
    }

    /// Bring `entry` back from disk, evicting others if the arena is full.
    pub fn recall(&self, ctx: &dyn RegionContext, entry: &Arc<RegionEntry>) -> Result<Recalled> {
        let mut requested = 0;
        for _ in 0..MAX_RECALL_ATTEMPTS {
            match entry.recall(ctx) {
                Ok(recalled) => {
                    if recalled.from_disk {
                        self.track(entry);
                    } else {
                        self.touch(entry);
                    }
                    return Ok(recalled);
                }
                Err(Error::OutOfOffHeapMemory { requested: r, .. }) => {
                    requested = r;
                    if self.make_room(ctx, r).is_empty() {
                        break;
                    }
                }
                Err(e) => {
                    if matches!(e, Error::RecallFailed { .. }) {
                        ctx.stats().record(StatEvent::RecallFailed);
                    }
                    return Err(e);
                }
            }
        }

        ctx.stats().record(StatEvent::RecallFailed);
        Err(Error::CapacityExceeded {
            requested,
            reason: format!("no room to recall key {}", entry.key()),
        })
    }

    /// Forget every tracked entry
    pub fn clear(&self) {
        self.eviction.lru().clear();
    }

    fn run_pass(&self, ctx: &dyn RegionContext, satisfied: impl Fn() -> bool) -> EvictionPass {
        let lru = self.eviction.lru();
        let mut pass = EvictionPass::default();
        let mut retry = Vec::new();

        while !satisfied() {
            let Some((entry, stamp)) = lru.pop_lru() else {
                break;
            };

            match entry.try_evict(ctx) {
                EvictOutcome::Evicted(bytes) => {
                    pass.evicted += 1;
                    pass.bytes_freed += bytes;
                }
                EvictOutcome::Busy => {
                    pass.skipped_busy += 1;
                    retry.push((entry, stamp));
                }
                EvictOutcome::NotResident => {}
                EvictOutcome::Failed(e) => {
                    warn!(key = %entry.key(), "eviction candidate skipped: {}", e);
                    ctx.stats().record(StatEvent::EvictionFailed);
                    pass.failed += 1;
                    retry.push((entry, stamp));
                }
            }
        }

        // skipped candidates keep their old position
        for (entry, stamp) in retry {
            if !entry.is_destroyed() {
                lru.insert(&entry, stamp);
            }
        }
        pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RegionAttributes;
    use crate::disk::{DiskSlot, DiskToken, MemoryOverflowStore, OverflowStats, OverflowStore};
    use crate::entry::{RegionEntryFactory, ValueLocation};
    use crate::key::RegionKey;
    use assert_matches::assert_matches;
    use bytes::Bytes;

    fn put(
        attrs: &RegionAttributes,
        controller: &LruController,
        key: i32,
        value: &'static [u8],
    ) -> Arc<RegionEntry> {
        let entry = Arc::new(
            RegionEntryFactory::for_context(attrs)
                .create_entry(attrs, RegionKey::Int(key), Bytes::from_static(value))
                .unwrap(),
        );
        controller.track(&entry);
        entry
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let attrs = RegionAttributes::heap_only().with_disk_lru(1 << 20);
        let controller = LruController::new(EvictionLimit::EntryCount(2), RecencyClock::Logical);

        let a = put(&attrs, &controller, 1, b"a");
        let b = put(&attrs, &controller, 2, b"b");
        controller.touch(&a);
        let c = put(&attrs, &controller, 3, b"c");

        let pass = controller.evict_if_needed(&attrs);
        assert_eq!(pass.evicted, 1);
        assert_eq!(b.location(), ValueLocation::Disk);
        assert_eq!(a.location(), ValueLocation::Heap);
        assert_eq!(c.location(), ValueLocation::Heap);
    }

    #[test]
    fn test_under_limit_is_a_no_op() {
        let attrs = RegionAttributes::heap_only().with_disk_lru(1 << 20);
        let controller = LruController::new(EvictionLimit::EntryCount(5), RecencyClock::Logical);
        put(&attrs, &controller, 1, b"a");
        assert_eq!(controller.evict_if_needed(&attrs), EvictionPass::default());
    }

    #[test]
    fn test_failed_candidate_does_not_halt_pass() {
        let store = Arc::new(MemoryOverflowStore::new(4));
        let attrs = RegionAttributes::heap_only().with_overflow_store(store);
        let controller = LruController::new(EvictionLimit::EntryCount(1), RecencyClock::Logical);

        // too large for the store
        let big = put(&attrs, &controller, 1, b"0123456789");
        let small = put(&attrs, &controller, 2, b"ab");

        let pass = controller.evict_if_needed(&attrs);
        assert_eq!(pass.failed, 1);
        assert_eq!(pass.evicted, 1);
        assert_eq!(big.location(), ValueLocation::Heap);
        assert_eq!(small.location(), ValueLocation::Disk);
        // failed candidate stays tracked
        assert_eq!(controller.eviction_context().lru().keys(), vec![RegionKey::Int(1)]);
    }

    /// Store whose persist for one key parks until released
    struct GatedStore {
        inner: MemoryOverflowStore,
        target: u64,
        gate: std::sync::Barrier,
    }

    impl OverflowStore for GatedStore {
        fn persist(&self, key_hash: u64, version: u64, bytes: &[u8]) -> Result<DiskToken> {
            if key_hash == self.target {
                self.gate.wait();
                self.gate.wait();
            }
            self.inner.persist(key_hash, version, bytes)
        }

        fn recall(&self, token: DiskToken) -> Result<DiskSlot> {
            self.inner.recall(token)
        }

        fn free(&self, token: DiskToken) -> Result<()> {
            self.inner.free(token)
        }

        fn stats(&self) -> OverflowStats {
            self.inner.stats()
        }
    }

    #[test]
    fn test_busy_candidate_is_skipped() {
        let store = Arc::new(GatedStore {
            inner: MemoryOverflowStore::new(1 << 20),
            target: RegionKey::Int(1).identity_hash(),
            gate: std::sync::Barrier::new(2),
        });
        let attrs = RegionAttributes::heap_only().with_overflow_store(store.clone());
        let controller = LruController::new(EvictionLimit::EntryCount(1), RecencyClock::Logical);
        let a = put(&attrs, &controller, 1, b"a");
        let b = put(&attrs, &controller, 2, b"b");

        let pass = std::thread::scope(|s| {
            let worker = s.spawn(|| a.evict(&attrs));
            // the worker now holds a's lock inside persist
            store.gate.wait();
            let pass = controller.evict_if_needed(&attrs);
            store.gate.wait();
            assert_matches!(worker.join().unwrap(), EvictOutcome::Evicted(1));
            pass
        });

        assert_eq!(pass.skipped_busy, 1);
        assert_eq!(pass.evicted, 1);
        assert_eq!(a.location(), ValueLocation::Disk);
        assert_eq!(b.location(), ValueLocation::Disk);
        // the busy candidate went back on the list
        assert_eq!(controller.eviction_context().lru().keys(), vec![RegionKey::Int(1)]);
    }

    #[test]
    fn test_make_room_frees_arena() {
        let attrs = RegionAttributes::heap_only()
            .with_off_heap(16)
            .with_disk_lru(1 << 20);
        let controller = LruController::new(EvictionLimit::MemoryBytes(1 << 20), RecencyClock::Logical);
        let a = put(&attrs, &controller, 1, b"aaaaaaaa");
        let _b = put(&attrs, &controller, 2, b"bbbbbbbb");

        let pass = controller.make_room(&attrs, 8);
        assert_eq!(pass.evicted, 1);
        assert_eq!(a.location(), ValueLocation::Disk);
        assert_eq!(attrs.off_heap().unwrap().available(), 8);
    }

    #[test]
    fn test_recall_tracks_entry_again() {
        let attrs = RegionAttributes::heap_only().with_disk_lru(1 << 20);
        let controller = LruController::new(EvictionLimit::EntryCount(10), RecencyClock::Logical);
        let a = put(&attrs, &controller, 1, b"value");

        assert!(controller.evict_entry(&attrs, &a).unwrap());
        assert!(controller.eviction_context().lru().is_empty());
        assert!(!controller.evict_entry(&attrs, &a).unwrap());

        let recalled = controller.recall(&attrs, &a).unwrap();
        assert_eq!(recalled.value.as_ref(), b"value");
        assert_eq!(controller.eviction_context().lru().len(), 1);
    }

    #[test]
    fn test_recall_makes_room() {
        let attrs = RegionAttributes::heap_only()
            .with_off_heap(8)
            .with_disk_lru(1 << 20);
        let controller = LruController::new(EvictionLimit::MemoryBytes(1 << 20), RecencyClock::Logical);
        let a = put(&attrs, &controller, 1, b"aaaaaa");
        controller.evict_entry(&attrs, &a).unwrap();
        let b = put(&attrs, &controller, 2, b"bbbbbb");

        let recalled = controller.recall(&attrs, &a).unwrap();
        assert!(recalled.from_disk);
        assert_eq!(b.location(), ValueLocation::Disk);
        assert_eq!(a.location(), ValueLocation::OffHeap);
    }

    #[test]
    fn test_recall_without_room_is_capacity_error() {
        let attrs = RegionAttributes::heap_only()
            .with_off_heap(4)
            .with_disk_lru(1 << 20);
        let controller = LruController::new(EvictionLimit::MemoryBytes(1 << 20), RecencyClock::Logical);
        let a = put(&attrs, &controller, 1, b"aaaa");
        controller.evict_entry(&attrs, &a).unwrap();

        // an untracked block nobody can evict fills the arena
        let arena = attrs.off_heap().unwrap();
        let pinned = arena.allocate(4).unwrap();

        assert_matches!(
            controller.recall(&attrs, &a),
            Err(Error::CapacityExceeded { requested: 4, .. })
        );
        assert_eq!(a.location(), ValueLocation::Disk);
        arena.release(&pinned).unwrap();
    }
}
