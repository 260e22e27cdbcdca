//! LRU Eviction
//!
//! Tracks recency and memory pressure, and moves values between tiers.
//!
//! # Entry States
//!
//! ```text
//!                 touch()                      recall()
//!              ┌─────────┐        ┌────────────────────────────────┐
//!              ▼         │        ▼                                │
//!        ┌──────────────────┐  try_evict()  ┌──────────────┐  ┌───────────────┐
//!  put ─▶│ resident (memory)│──────────────▶│ marked for   │─▶│ resident on   │
//!        └──────────────────┘               │ eviction     │  │ disk          │
//!                 ▲                         └──────┬───────┘  └───────────────┘
//!                 └────── persist failed ──────────┘
//! ```
//!
//! Ordering is `(recency stamp, insertion sequence)`, so entries with equal
//! stamps leave in the order they were created.

mod controller;
mod lru;

pub use controller::{EvictionPass, LruController};
pub use lru::LruList;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::offheap::OffHeapArena;

// =============================================================================
// Limits and Clock
// =============================================================================

/// Threshold that triggers an eviction pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionLimit {
    /// Never evict
    #[default]
    None,
    /// Maximum number of entries resident in memory
    EntryCount(u64),
    /// Maximum heap plus off-heap value bytes
    MemoryBytes(u64),
}

/// Source of recency stamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecencyClock {
    /// Strictly increasing counter, one tick per access
    #[default]
    Logical,
    /// Wall-clock milliseconds rounded down to `resolution_ms`
    Coarse { resolution_ms: u64 },
}

// =============================================================================
// Memory Usage
// =============================================================================

/// Aggregate memory counters shared by every entry of a region.
///
/// Off-heap bytes are read from the arena; only heap value bytes are counted
/// here.
#[derive(Debug, Default)]
pub struct MemoryUsage {
    heap_bytes: AtomicUsize,
    resident_entries: AtomicUsize,
}

impl MemoryUsage {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_heap(&self, bytes: usize) {
        self.heap_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    #[inline]
    pub fn sub_heap(&self, bytes: usize) {
        self.heap_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }

    #[inline]
    pub fn entry_resident(&self) {
        self.resident_entries.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn entry_departed(&self) {
        self.resident_entries.fetch_sub(1, Ordering::AcqRel);
    }

    /// Heap bytes held by entry values
    pub fn heap_bytes(&self) -> usize {
        self.heap_bytes.load(Ordering::Acquire)
    }

    /// Entries whose value is in memory
    pub fn resident_entries(&self) -> usize {
        self.resident_entries.load(Ordering::Acquire)
    }
}

// =============================================================================
// Eviction Context
// =============================================================================

/// Eviction state for one region: limit, clock and LRU ordering.
///
/// Created with the region and dropped with it.
pub struct EvictionContext {
    limit: EvictionLimit,
    clock: RecencyClock,
    ticks: AtomicU64,
    epoch: Instant,
    lru: LruList,
}

impl EvictionContext {
    pub fn new(limit: EvictionLimit, clock: RecencyClock) -> Self {
        Self {
            limit,
            clock,
            ticks: AtomicU64::new(0),
            epoch: Instant::now(),
            lru: LruList::new(),
        }
    }

    pub fn limit(&self) -> EvictionLimit {
        self.limit
    }

    pub fn lru(&self) -> &LruList {
        &self.lru
    }

    /// Next recency stamp
    pub fn stamp(&self) -> u64 {
        match self.clock {
            RecencyClock::Logical => self.ticks.fetch_add(1, Ordering::Relaxed) + 1,
            RecencyClock::Coarse { resolution_ms } => {
                let elapsed = self.epoch.elapsed().as_millis() as u64;
                elapsed / resolution_ms.max(1)
            }
        }
    }

    /// Whether current usage is above the limit
    pub fn is_over_limit(&self, memory: &MemoryUsage, arena: Option<&OffHeapArena>) -> bool {
        match self.limit {
            EvictionLimit::None => false,
            EvictionLimit::EntryCount(max) => memory.resident_entries() as u64 > max,
            EvictionLimit::MemoryBytes(max) => {
                let off_heap = arena.map(|a| a.used()).unwrap_or(0);
                (memory.heap_bytes() + off_heap) as u64 > max
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_usage_counters() {
        let memory = MemoryUsage::new();
        memory.add_heap(100);
        memory.add_heap(20);
        memory.sub_heap(100);
        memory.entry_resident();
        memory.entry_resident();
        memory.entry_departed();

        assert_eq!(memory.heap_bytes(), 20);
        assert_eq!(memory.resident_entries(), 1);
    }

    #[test]
    fn test_logical_clock_increases() {
        let ctx = EvictionContext::new(EvictionLimit::None, RecencyClock::Logical);
        let a = ctx.stamp();
        let b = ctx.stamp();
        assert!(b > a);
    }

    #[test]
    fn test_coarse_clock_collapses_stamps() {
        let ctx = EvictionContext::new(
            EvictionLimit::None,
            RecencyClock::Coarse {
                resolution_ms: 3_600_000,
            },
        );
        assert_eq!(ctx.stamp(), ctx.stamp());
    }

    #[test]
    fn test_entry_count_limit() {
        let ctx = EvictionContext::new(EvictionLimit::EntryCount(1), RecencyClock::Logical);
        let memory = MemoryUsage::new();
        memory.entry_resident();
        assert!(!ctx.is_over_limit(&memory, None));
        memory.entry_resident();
        assert!(ctx.is_over_limit(&memory, None));
    }

    #[test]
    fn test_memory_limit_counts_off_heap() {
        let ctx = EvictionContext::new(EvictionLimit::MemoryBytes(100), RecencyClock::Logical);
        let memory = MemoryUsage::new();
        let arena = OffHeapArena::new(1024);
        memory.add_heap(60);
        assert!(!ctx.is_over_limit(&memory, Some(&arena)));

        let token = arena.allocate(50).unwrap();
        assert!(ctx.is_over_limit(&memory, Some(&arena)));
        arena.release(&token).unwrap();
    }

    #[test]
    fn test_limit_serde() {
        let limit: EvictionLimit = serde_json::from_str(r#"{"entry_count": 5}"#).unwrap();
        assert_eq!(limit, EvictionLimit::EntryCount(5));
        let none: EvictionLimit = serde_json::from_str(r#""none""#).unwrap();
        assert_eq!(none, EvictionLimit::None);
    }
}
