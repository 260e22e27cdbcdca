//! LRU ordering of resident entries

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::RegionEntry;
use crate::key::RegionKey;

#[derive(Default)]
struct LruInner {
    /// (recency stamp, insertion sequence) -> entry
    order: BTreeMap<(u64, u64), Arc<RegionEntry>>,
    /// insertion sequence -> current stamp
    stamps: HashMap<u64, u64>,
}

/// Entries ordered least recently used first.
///
/// Only entries resident in memory are tracked. Never call into an entry
/// while holding the list lock.
#[derive(Default)]
pub struct LruList {
    inner: Mutex<LruInner>,
}

impl LruList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `entry` at `stamp`, repositioning it if already tracked.
    pub fn insert(&self, entry: &Arc<RegionEntry>, stamp: u64) {
        let seq = entry.sequence();
        let mut inner = self.inner.lock();
        if let Some(old) = inner.stamps.insert(seq, stamp) {
            inner.order.remove(&(old, seq));
        }
        inner.order.insert((stamp, seq), Arc::clone(entry));
    }

    /// Move a tracked entry to `stamp`. Untracked entries are left alone.
    pub fn touch(&self, entry: &RegionEntry, stamp: u64) -> bool {
        let seq = entry.sequence();
        let mut inner = self.inner.lock();
        let old = match inner.stamps.get_mut(&seq) {
            Some(current) if *current == stamp => return true,
            Some(current) => std::mem::replace(current, stamp),
            None => return false,
        };
        if let Some(tracked) = inner.order.remove(&(old, seq)) {
            inner.order.insert((stamp, seq), tracked);
        }
        true
    }

    /// Stop tracking `entry`
    pub fn remove(&self, entry: &RegionEntry) -> bool {
        let seq = entry.sequence();
        let mut inner = self.inner.lock();
        match inner.stamps.remove(&seq) {
            Some(stamp) => inner.order.remove(&(stamp, seq)).is_some(),
            None => false,
        }
    }

    /// Take the least recently used entry out of the list.
    pub fn pop_lru(&self) -> Option<(Arc<RegionEntry>, u64)> {
        let mut inner = self.inner.lock();
        let ((stamp, seq), entry) = inner.order.pop_first()?;
        inner.stamps.remove(&seq);
        Some((entry, stamp))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.order.clear();
        inner.stamps.clear();
    }

    /// Keys from least to most recently used
    pub fn keys(&self) -> Vec<RegionKey> {
        let entries: Vec<Arc<RegionEntry>> = self.inner.lock().order.values().cloned().collect();
        entries.iter().map(|e| e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RegionAttributes;
    use crate::entry::RegionEntryFactory;
    use bytes::Bytes;

    fn entries(n: i32) -> Vec<Arc<RegionEntry>> {
        let attrs = RegionAttributes::heap_only();
        let factory = RegionEntryFactory::for_context(&attrs);
        (0..n)
            .map(|i| {
                Arc::new(
                    factory
                        .create_entry(&attrs, RegionKey::Int(i), Bytes::new())
                        .unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_pop_in_stamp_order() {
        let lru = LruList::new();
        let e = entries(3);
        lru.insert(&e[0], 30);
        lru.insert(&e[1], 10);
        lru.insert(&e[2], 20);

        assert_eq!(lru.keys(), vec![RegionKey::Int(1), RegionKey::Int(2), RegionKey::Int(0)]);
        assert_eq!(lru.pop_lru().unwrap().0.key(), RegionKey::Int(1));
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn test_equal_stamps_fall_back_to_insertion_order() {
        let lru = LruList::new();
        let e = entries(3);
        lru.insert(&e[2], 5);
        lru.insert(&e[0], 5);
        lru.insert(&e[1], 5);

        assert_eq!(lru.keys(), vec![RegionKey::Int(0), RegionKey::Int(1), RegionKey::Int(2)]);
    }

    #[test]
    fn test_touch_repositions() {
        let lru = LruList::new();
        let e = entries(2);
        lru.insert(&e[0], 1);
        lru.insert(&e[1], 2);

        assert!(lru.touch(&e[0], 3));
        assert_eq!(lru.keys(), vec![RegionKey::Int(1), RegionKey::Int(0)]);
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn test_touch_ignores_untracked() {
        let lru = LruList::new();
        let e = entries(1);
        assert!(!lru.touch(&e[0], 1));
        assert!(lru.is_empty());
    }

    #[test]
    fn test_reinsert_does_not_duplicate() {
        let lru = LruList::new();
        let e = entries(1);
        lru.insert(&e[0], 1);
        lru.insert(&e[0], 9);
        assert_eq!(lru.len(), 1);

        assert!(lru.remove(&e[0]));
        assert!(!lru.remove(&e[0]));
        assert!(lru.pop_lru().is_none());
    }
}
