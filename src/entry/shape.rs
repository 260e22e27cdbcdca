//! Entry variant descriptors and footprint model

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::RegionContext;
use crate::key::KeyKind;

/// Lock, flags and insertion sequence
pub const ENTRY_HEADER_BYTES: usize = 24;
/// Tagged value reference
pub const VALUE_REF_BYTES: usize = 16;
/// LRU stamp and list linkage
pub const LRU_FIELDS_BYTES: usize = 16;
/// Version stamp
pub const VERSION_BYTES: usize = 8;
/// Header of an externally held key object
pub const KEY_OBJECT_HEADER_BYTES: usize = 16;

/// Where an entry keeps its value while resident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    Heap,
    OffHeap,
}

/// Whether an entry takes part in LRU overflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionKind {
    None,
    DiskLru,
}

/// Everything about an entry's layout except the key encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryShape {
    pub storage: StorageKind,
    pub eviction: EvictionKind,
    pub versioned: bool,
}

impl EntryShape {
    /// Shape required by `ctx`
    pub fn for_context(ctx: &dyn RegionContext) -> Self {
        Self {
            storage: if ctx.off_heap().is_some() {
                StorageKind::OffHeap
            } else {
                StorageKind::Heap
            },
            eviction: if ctx.is_disk_lru() {
                EvictionKind::DiskLru
            } else {
                EvictionKind::None
            },
            versioned: ctx.is_versioned(),
        }
    }

    pub fn is_off_heap(&self) -> bool {
        self.storage == StorageKind::OffHeap
    }

    pub fn is_evictable(&self) -> bool {
        self.eviction == EvictionKind::DiskLru
    }

    /// Every shape, in a fixed order
    pub fn all() -> impl Iterator<Item = EntryShape> {
        [StorageKind::Heap, StorageKind::OffHeap]
            .into_iter()
            .flat_map(|storage| {
                [EvictionKind::None, EvictionKind::DiskLru]
                    .into_iter()
                    .flat_map(move |eviction| {
                        [false, true].into_iter().map(move |versioned| EntryShape {
                            storage,
                            eviction,
                            versioned,
                        })
                    })
            })
    }
}

/// Concrete entry variant: key encoding plus shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryVariant {
    pub key: KeyKind,
    pub shape: EntryShape,
}

impl EntryVariant {
    pub fn new(key: KeyKind, shape: EntryShape) -> Self {
        Self { key, shape }
    }

    /// Every variant the factory can produce
    pub fn all() -> impl Iterator<Item = EntryVariant> {
        KeyKind::all()
            .into_iter()
            .flat_map(|key| EntryShape::all().map(move |shape| EntryVariant { key, shape }))
    }

    /// Bytes one entry of this variant occupies, excluding its value.
    pub fn footprint(&self) -> usize {
        let mut bytes = ENTRY_HEADER_BYTES + VALUE_REF_BYTES + self.key.inline_bytes();
        if self.key == KeyKind::Object {
            bytes += KEY_OBJECT_HEADER_BYTES;
        }
        if self.shape.is_evictable() {
            bytes += LRU_FIELDS_BYTES;
        }
        if self.shape.versioned {
            bytes += VERSION_BYTES;
        }
        bytes
    }

    /// e.g. `long-key/off-heap/disk-lru/versioned`
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EntryVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key.name())?;
        f.write_str(match self.shape.storage {
            StorageKind::Heap => "/heap",
            StorageKind::OffHeap => "/off-heap",
        })?;
        if self.shape.is_evictable() {
            f.write_str("/disk-lru")?;
        }
        if self.shape.versioned {
            f.write_str("/versioned")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn shape(storage: StorageKind, eviction: EvictionKind, versioned: bool) -> EntryShape {
        EntryShape {
            storage,
            eviction,
            versioned,
        }
    }

    #[test]
    fn test_variant_cross_product() {
        let variants: HashSet<_> = EntryVariant::all().collect();
        assert_eq!(variants.len(), 6 * 2 * 2 * 2);
    }

    #[test]
    fn test_variant_names() {
        let v = EntryVariant::new(
            KeyKind::Long,
            shape(StorageKind::OffHeap, EvictionKind::DiskLru, true),
        );
        assert_eq!(v.name(), "long-key/off-heap/disk-lru/versioned");

        let v = EntryVariant::new(
            KeyKind::NarrowString,
            shape(StorageKind::Heap, EvictionKind::None, false),
        );
        assert_eq!(v.to_string(), "narrow-string-key/heap");
    }

    #[test]
    fn test_generic_key_is_largest() {
        for s in EntryShape::all() {
            let generic = EntryVariant::new(KeyKind::Object, s).footprint();
            for key in KeyKind::all() {
                assert!(EntryVariant::new(key, s).footprint() <= generic);
            }
        }
    }

    #[test]
    fn test_footprint_grows_with_features() {
        let base = EntryVariant::new(
            KeyKind::Int,
            shape(StorageKind::Heap, EvictionKind::None, false),
        );
        let full = EntryVariant::new(
            KeyKind::Int,
            shape(StorageKind::Heap, EvictionKind::DiskLru, true),
        );
        assert_eq!(
            full.footprint() - base.footprint(),
            LRU_FIELDS_BYTES + VERSION_BYTES
        );
    }
}
