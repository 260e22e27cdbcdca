//! Arena bookkeeping, tokens and scoped guards.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, warn};

use super::block::{Block, Transition};
use crate::error::{Error, Result};
use crate::stats::{NoopStats, StatEvent, StatisticsSink};

/// Shared accounting state every block points back to.
pub(crate) struct ArenaShared {
    capacity: usize,
    used: AtomicUsize,
    live: AtomicUsize,
    next_id: AtomicU64,
    invalid_handle_faults: AtomicU64,
    leaked: AtomicU64,
    stats: Arc<dyn StatisticsSink>,
}

impl ArenaShared {
    fn unreserve(&self, len: usize) {
        self.used.fetch_sub(len, Ordering::AcqRel);
    }

    fn on_reclaimed(&self, len: usize) {
        self.unreserve(len);
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.stats.record(StatEvent::Freed { bytes: len as u64 });
    }

    fn on_invalid(&self, block: u64, operation: &'static str) -> Error {
        self.invalid_handle_faults.fetch_add(1, Ordering::Relaxed);
        self.stats.record(StatEvent::InvalidHandle);
        error!(block, operation, "off-heap handle used after reclamation");
        Error::InvalidHandle { block, operation }
    }

    pub(crate) fn on_leaked(&self, block: u64, len: usize) {
        self.leaked.fetch_add(1, Ordering::Relaxed);
        self.on_reclaimed(len);
        self.stats.record(StatEvent::Leaked { bytes: len as u64 });
        warn!(block, len, "off-heap allocation dropped while still referenced");
    }
}

/// Result of a successful [`OffHeapArena::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// Other holders remain; the count after the release
    StillReferenced(u32),
    /// This release reclaimed the memory
    Reclaimed,
}

/// Address of an off-heap block.
///
/// Cloning a token does not change the reference count.
#[derive(Clone)]
pub struct OffHeapToken {
    block: Arc<Block>,
}

impl OffHeapToken {
    /// Arena-unique block id
    #[inline]
    pub fn id(&self) -> u64 {
        self.block.id()
    }

    /// Length of the stored bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.block.len()
    }

    /// Whether the block stores zero bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block.len() == 0
    }

    /// Current reference count (0 once reclaimed)
    pub fn ref_count(&self) -> u32 {
        self.block.refs()
    }

    /// Whether the block's memory is still alive
    pub fn is_live(&self) -> bool {
        self.block.refs() > 0
    }
}

impl PartialEq for OffHeapToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.block, &other.block)
    }
}

impl Eq for OffHeapToken {}

impl fmt::Debug for OffHeapToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffHeapToken")
            .field("id", &self.id())
            .field("len", &self.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Scoped read access to an off-heap block.
///
/// Holds one count for its lifetime and gives it back on drop.
#[derive(Debug)]
pub struct OffHeapGuard {
    token: OffHeapToken,
}

impl OffHeapGuard {
    /// Token this guard is holding
    pub fn token(&self) -> &OffHeapToken {
        &self.token
    }

    /// Copy the bytes out
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl Deref for OffHeapGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the guard holds a count until it is dropped.
        unsafe { self.token.block.as_slice() }
    }
}

impl Drop for OffHeapGuard {
    fn drop(&mut self) {
        let block = &self.token.block;
        match block.try_release() {
            Some(Transition::Reclaim) => {
                // SAFETY: this release took the count to zero.
                unsafe { block.reclaim() };
                block.arena.on_reclaimed(block.len());
            }
            Some(Transition::Live(_)) => {}
            None => {
                block.arena.on_invalid(block.id(), "guard-release");
            }
        }
    }
}

/// Off-heap allocator with a hard byte ceiling.
#[derive(Clone)]
pub struct OffHeapArena {
    shared: Arc<ArenaShared>,
}

impl OffHeapArena {
    /// Create an arena that may hold at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self::with_stats(capacity, Arc::new(NoopStats))
    }

    /// Create an arena reporting allocate/free events to `stats`.
    pub fn with_stats(capacity: usize, stats: Arc<dyn StatisticsSink>) -> Self {
        Self {
            shared: Arc::new(ArenaShared {
                capacity,
                used: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                invalid_handle_faults: AtomicU64::new(0),
                leaked: AtomicU64::new(0),
                stats,
            }),
        }
    }

    /// Allocate a zeroed block of `size` bytes with a count of one.
    pub fn allocate(&self, size: usize) -> Result<OffHeapToken> {
        let shared = &self.shared;

        shared
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|&next| next <= shared.capacity)
            })
            .map_err(|used| Error::OutOfOffHeapMemory {
                requested: size,
                available: shared.capacity.saturating_sub(used),
            })?;

        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let block = match Block::allocate(id, size, Arc::clone(shared)) {
            Some(block) => block,
            None => {
                shared.unreserve(size);
                return Err(Error::OutOfOffHeapMemory {
                    requested: size,
                    available: self.available(),
                });
            }
        };

        shared.live.fetch_add(1, Ordering::AcqRel);
        shared.stats.record(StatEvent::Allocated { bytes: size as u64 });

        Ok(OffHeapToken {
            block: Arc::new(block),
        })
    }

    /// Allocate a block holding a copy of `data`.
    pub fn allocate_from(&self, data: &[u8]) -> Result<OffHeapToken> {
        let token = self.allocate(data.len())?;
        // SAFETY: the token was just created and has not been shared.
        unsafe { token.block.write_unpublished(data) };
        Ok(token)
    }

    /// Add one count on behalf of a new holder.
    pub fn retain(&self, token: &OffHeapToken) -> Result<u32> {
        self.check_owner(token, "retain")?;
        token
            .block
            .try_retain()
            .ok_or_else(|| self.shared.on_invalid(token.id(), "retain"))
    }

    /// Give back one count; reclaims the memory when it was the last.
    pub fn release(&self, token: &OffHeapToken) -> Result<Released> {
        self.check_owner(token, "release")?;
        match token.block.try_release() {
            Some(Transition::Live(n)) => Ok(Released::StillReferenced(n)),
            Some(Transition::Reclaim) => {
                // SAFETY: this release took the count to zero.
                unsafe { token.block.reclaim() };
                self.shared.on_reclaimed(token.len());
                Ok(Released::Reclaimed)
            }
            None => Err(self.shared.on_invalid(token.id(), "release")),
        }
    }

    /// Retain the block for the lifetime of the returned guard.
    pub fn acquire(&self, token: &OffHeapToken) -> Result<OffHeapGuard> {
        self.retain(token)?;
        Ok(OffHeapGuard {
            token: token.clone(),
        })
    }

    /// Copy the block's bytes out under a temporary count.
    pub fn read(&self, token: &OffHeapToken) -> Result<Bytes> {
        let guard = self.acquire(token)?;
        Ok(guard.to_bytes())
    }

    /// Write `data` to fresh storage and give up the caller's count on `old`.
    ///
    /// The old count is released only after the new block exists, so a failed
    /// allocation leaves `old` untouched.
    pub fn replace(&self, old: &OffHeapToken, data: &[u8]) -> Result<OffHeapToken> {
        self.check_owner(old, "replace")?;
        if !old.is_live() {
            return Err(self.shared.on_invalid(old.id(), "replace"));
        }
        let fresh = self.allocate_from(data)?;
        if let Err(e) = self.release(old) {
            // do not leak the replacement
            let _ = self.release(&fresh);
            return Err(e);
        }
        Ok(fresh)
    }

    /// Configured ceiling in bytes
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Bytes currently allocated
    pub fn used(&self) -> usize {
        self.shared.used.load(Ordering::Acquire)
    }

    /// Bytes still available under the ceiling
    pub fn available(&self) -> usize {
        self.shared.capacity.saturating_sub(self.used())
    }

    /// Blocks currently alive
    pub fn live_allocations(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Uses of reclaimed tokens detected so far
    pub fn invalid_handle_faults(&self) -> u64 {
        self.shared.invalid_handle_faults.load(Ordering::Relaxed)
    }

    /// Blocks reclaimed because their last token was dropped while owned
    pub fn leaked_allocations(&self) -> u64 {
        self.shared.leaked.load(Ordering::Relaxed)
    }

    fn check_owner(&self, token: &OffHeapToken, operation: &'static str) -> Result<()> {
        if Arc::ptr_eq(&token.block.arena, &self.shared) {
            Ok(())
        } else {
            Err(self.shared.on_invalid(token.id(), operation))
        }
    }
}

impl fmt::Debug for OffHeapArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffHeapArena")
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .field("live", &self.live_allocations())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
