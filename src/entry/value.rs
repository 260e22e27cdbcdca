//! Value reference tag

use bytes::Bytes;

use crate::context::RegionContext;
use crate::disk::DiskToken;
use crate::error::{Error, Result};
use crate::offheap::OffHeapToken;

/// Where an entry's value currently lives. Exactly one tag is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueRef {
    /// Bytes in the managed heap
    Heap(Bytes),
    /// Block in the off-heap arena; the entry owns one count
    OffHeap(OffHeapToken),
    /// Evicted to the overflow store
    Disk(DiskToken),
    /// Entry destroyed
    Invalid,
}

impl ValueRef {
    pub fn location(&self) -> ValueLocation {
        match self {
            ValueRef::Heap(_) => ValueLocation::Heap,
            ValueRef::OffHeap(_) => ValueLocation::OffHeap,
            ValueRef::Disk(_) => ValueLocation::Disk,
            ValueRef::Invalid => ValueLocation::Invalid,
        }
    }

    /// Whether the value is in memory
    pub fn is_resident(&self) -> bool {
        matches!(self, ValueRef::Heap(_) | ValueRef::OffHeap(_))
    }
}

/// Copyable view of a [`ValueRef`] tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueLocation {
    Heap,
    OffHeap,
    Disk,
    Invalid,
}

/// Compress `value` when the region has a compressor and it pays off.
pub(crate) fn encode_value(ctx: &dyn RegionContext, value: &Bytes) -> (Bytes, bool) {
    match ctx.compressor() {
        Some(compressor) => match compressor.compress(value) {
            Ok(packed) if packed.len() < value.len() => (Bytes::from(packed), true),
            _ => (value.clone(), false),
        },
        None => (value.clone(), false),
    }
}

/// Reverse [`encode_value`].
pub(crate) fn decode_value(ctx: &dyn RegionContext, stored: Bytes, compressed: bool) -> Result<Bytes> {
    if !compressed {
        return Ok(stored);
    }
    let compressor = ctx
        .compressor()
        .ok_or_else(|| Error::Config("compressed entry in a region without a compressor".into()))?;
    Ok(Bytes::from(compressor.decompress(&stored)?))
}
