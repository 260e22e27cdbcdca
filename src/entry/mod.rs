//! Region Entries
//!
//! One record per key/value pair. Instead of one type per combination of key
//! encoding, storage, eviction and versioning, there is a single
//! [`RegionEntry`] carrying an [`EntryVariant`] descriptor:
//!
//! ```text
//! EntryVariant
//! ├── key:     int │ long │ uuid │ narrow-string │ wide-string │ object
//! └── shape
//!     ├── storage:  heap │ off-heap
//!     ├── eviction: none │ disk-lru
//!     └── versioned
//! ```
//!
//! The value itself is a [`ValueRef`] tag (heap bytes, off-heap token, disk
//! token or invalid) guarded by the entry's lock. Every tag change happens
//! under that lock, so readers see either the old or the new tag.

mod factory;
mod region_entry;
mod shape;
mod value;

pub use factory::{EntryClass, RegionEntryFactory};
pub use region_entry::{EntryKey, EntryRead, EvictOutcome, Recalled, RegionEntry};
pub use shape::{EntryShape, EntryVariant, EvictionKind, StorageKind};
pub use value::{ValueLocation, ValueRef};
