//! Off-Heap Memory Arena
//!
//! Reference-counted byte blocks allocated outside the managed value heap.
//!
//! # Ownership
//!
//! ```text
//!   allocate()          retain()            release()           release()
//!  ───────────▶ refs=1 ──────────▶ refs=2 ───────────▶ refs=1 ───────────▶ refs=0
//!                                                                          │
//!                                                   memory reclaimed ◀─────┘
//!                                                   token now invalid
//! ```
//!
//! An [`OffHeapToken`] is an address, not an owner: whoever received a count
//! from `allocate`/`retain` must give it back with `release`. Scoped reads go
//! through [`OffHeapGuard`], which retains on creation and releases on drop,
//! so a reader can never observe memory that is being reclaimed.
//!
//! Any use of a token after its count reached zero fails with
//! [`Error::InvalidHandle`](crate::error::Error::InvalidHandle) and bumps
//! [`OffHeapArena::invalid_handle_faults`].

mod arena;
mod block;

pub use arena::{OffHeapArena, OffHeapGuard, OffHeapToken, Released};

/// Alignment of every off-heap block
pub const BLOCK_ALIGNMENT: usize = 8;
