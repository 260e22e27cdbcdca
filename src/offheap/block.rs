//! Raw off-heap block with an embedded reference count.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::arena::ArenaShared;
use super::BLOCK_ALIGNMENT;

/// Outcome of a count transition that did not fail.
pub(crate) enum Transition {
    /// The count moved and is still positive
    Live(u32),
    /// This call took the count to zero
    Reclaim,
}

/// A single allocation.
///
/// `refs == 0` means the memory behind `ptr` has been returned to the system;
/// `ptr` is dangling from then on and must never be dereferenced.
pub(crate) struct Block {
    id: u64,
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
    refs: AtomicU32,
    pub(crate) arena: Arc<ArenaShared>,
}

// SAFETY: The memory is written only before the block is published (while the
// allocating thread holds the sole count) and is read only by holders of a
// count, so shared access across threads is read-only.
unsafe impl Send for Block {}
unsafe impl Sync for Block {}

impl Block {
    /// Allocate zeroed memory for `len` bytes. Returns `None` if the system
    /// allocator refuses.
    pub(crate) fn allocate(id: u64, len: usize, arena: Arc<ArenaShared>) -> Option<Self> {
        // zero-length values still get a distinct address
        let layout = Layout::from_size_align(len.max(1), BLOCK_ALIGNMENT).ok()?;

        // SAFETY: layout has non-zero size and a valid power-of-two alignment.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;

        Some(Self {
            id,
            ptr,
            len,
            layout,
            refs: AtomicU32::new(1),
            arena,
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Copy `data` into the block.
    ///
    /// # Safety
    ///
    /// The caller must hold the only count and must not have published the
    /// block to any other thread yet.
    pub(crate) unsafe fn write_unpublished(&self, data: &[u8]) {
        debug_assert!(data.len() <= self.len);
        std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr(), data.len());
    }

    /// View the block's bytes.
    ///
    /// # Safety
    ///
    /// The caller must hold a count for the whole lifetime of the slice.
    pub(crate) unsafe fn as_slice(&self) -> &[u8] {
        slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }

    /// Increment the count unless it already reached zero.
    pub(crate) fn try_retain(&self) -> Option<u32> {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n == 0 {
                    None
                } else {
                    Some(n + 1)
                }
            })
            .ok()
            .map(|prev| prev + 1)
    }

    /// Decrement the count unless it already reached zero.
    pub(crate) fn try_release(&self) -> Option<Transition> {
        let prev = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n == 0 {
                    None
                } else {
                    Some(n - 1)
                }
            })
            .ok()?;

        if prev == 1 {
            Some(Transition::Reclaim)
        } else {
            Some(Transition::Live(prev - 1))
        }
    }

    /// Return the memory to the system.
    ///
    /// # Safety
    ///
    /// Must be called exactly once, by the thread whose release observed the
    /// count drop to zero (or from `Drop` when the count never did).
    pub(crate) unsafe fn reclaim(&self) {
        dealloc(self.ptr.as_ptr(), self.layout);
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // Last token went away while someone still owned a count.
        if *self.refs.get_mut() > 0 {
            // SAFETY: count is positive so the memory was never reclaimed, and
            // with `&mut self` no other holder exists.
            unsafe { self.reclaim() };
            self.arena.on_leaked(self.id, self.len);
        }
    }
}
