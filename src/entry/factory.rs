//! Entry factory
//!
//! Picks the variant for a key and builds a fully initialised entry. The
//! entry is not shared with anyone until the caller publishes it, so
//! construction can never be observed half done.
//!
//! # Dispatch
//!
//! | key                              | variant key kind       |
//! |----------------------------------|------------------------|
//! | `i32`                            | `int-key`              |
//! | `i64`                            | `long-key`             |
//! | UUID                             | `uuid-key`             |
//! | string fitting the 8-byte field  | `narrow-string-key`    |
//! | string fitting the 16-byte field | `wide-string-key`      |
//! | anything else                    | `object-key`           |
//!
//! Storage, eviction and versioning come from the factory's [`EntryShape`].

use bytes::Bytes;

use super::region_entry::{EntryKey, RegionEntry};
use super::shape::{EntryShape, EntryVariant, EvictionKind, StorageKind};
use super::value::{encode_value, ValueRef};
use crate::context::RegionContext;
use crate::error::{Error, Result};
use crate::key::{KeyEncoder, KeyKind, RegionKey};

/// Size descriptor used for memory accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryClass {
    pub variant: EntryVariant,
    /// Bytes per entry, excluding the value
    pub footprint: usize,
}

/// Builds entries of one shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionEntryFactory {
    shape: EntryShape,
    inline_keys: bool,
}

impl RegionEntryFactory {
    pub fn new(shape: EntryShape, inline_keys: bool) -> Self {
        Self { shape, inline_keys }
    }

    /// Factory for the shape `ctx` requires
    pub fn for_context(ctx: &dyn RegionContext) -> Self {
        Self::new(EntryShape::for_context(ctx), ctx.inline_keys())
    }

    pub fn shape(&self) -> EntryShape {
        self.shape
    }

    /// Variant `key` gets from this factory
    pub fn variant_for(&self, key: &RegionKey) -> EntryVariant {
        let kind = if self.inline_keys {
            KeyEncoder::kind_of(key)
        } else {
            KeyKind::Object
        };
        EntryVariant::new(kind, self.shape)
    }

    /// Build an entry for `key` holding `value`.
    ///
    /// Allocates the value's storage; fails with
    /// [`Error::OutOfOffHeapMemory`] when the arena is full.
    pub fn create_entry(
        &self,
        ctx: &dyn RegionContext,
        key: RegionKey,
        value: Bytes,
    ) -> Result<RegionEntry> {
        let variant = self.variant_for(&key);
        let key_hash = key.identity_hash();

        let entry_key = match variant.key {
            KeyKind::Object => EntryKey::Object(key),
            _ => match KeyEncoder::encode(&key) {
                Some(inline) => EntryKey::Inline(inline),
                None => {
                    return Err(Error::Internal(format!(
                        "key {} classified as {} but not encodable",
                        key, variant.key
                    )))
                }
            },
        };

        let (stored, compressed) = encode_value(ctx, &value);
        let value_ref = match self.shape.storage {
            StorageKind::OffHeap => {
                let arena = ctx.off_heap().ok_or_else(|| {
                    Error::Config(format!("{} requires off-heap storage", variant))
                })?;
                ValueRef::OffHeap(arena.allocate_from(&stored)?)
            }
            StorageKind::Heap => {
                ctx.memory().add_heap(stored.len());
                ValueRef::Heap(stored)
            }
        };
        ctx.memory().entry_resident();

        Ok(RegionEntry::new(
            entry_key,
            key_hash,
            variant,
            ctx.next_sequence(),
            value_ref,
            compressed,
        ))
    }

    /// Reference size of one entry.
    ///
    /// Always describes the generic-key variant of this factory's shape. Inline
    /// keyed entries are smaller, so this overstates their footprint; use
    /// [`RegionEntry::footprint`] for the exact figure.
    pub fn entry_class(&self) -> EntryClass {
        let variant = EntryVariant::new(KeyKind::Object, self.shape);
        EntryClass {
            variant,
            footprint: variant.footprint(),
        }
    }

    /// Sibling factory producing versioned entries
    pub fn make_versioned(&self) -> Self {
        self.with_shape(EntryShape {
            versioned: true,
            ..self.shape
        })
    }

    /// Sibling factory producing heap entries
    pub fn make_on_heap(&self) -> Self {
        self.with_shape(EntryShape {
            storage: StorageKind::Heap,
            ..self.shape
        })
    }

    /// Sibling factory producing off-heap entries
    pub fn make_off_heap(&self) -> Self {
        self.with_shape(EntryShape {
            storage: StorageKind::OffHeap,
            ..self.shape
        })
    }

    /// Sibling factory producing disk-LRU evictable entries
    pub fn make_disk_lru(&self) -> Self {
        self.with_shape(EntryShape {
            eviction: EvictionKind::DiskLru,
            ..self.shape
        })
    }

    fn with_shape(&self, shape: EntryShape) -> Self {
        Self {
            shape,
            inline_keys: self.inline_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RegionAttributes;
    use crate::entry::ValueLocation;
    use assert_matches::assert_matches;
    use uuid::Uuid;

    fn kind_for(key: impl Into<RegionKey>) -> KeyKind {
        let attrs = RegionAttributes::heap_only();
        RegionEntryFactory::for_context(&attrs)
            .create_entry(&attrs, key.into(), Bytes::from_static(b"v"))
            .unwrap()
            .variant()
            .key
    }

    #[test]
    fn test_dispatch_by_key_type() {
        assert_eq!(kind_for(1i32), KeyKind::Int);
        assert_eq!(kind_for(4_294_967_296i64), KeyKind::Long);
        assert_eq!(kind_for(Uuid::from_u128(7)), KeyKind::Uuid);
        assert_eq!(kind_for("short"), KeyKind::NarrowString);
        assert_eq!(kind_for("fifteen chars!!"), KeyKind::WideString);
        assert_eq!(kind_for("sixteen chars!!!"), KeyKind::Object);
        assert_eq!(kind_for(Bytes::from_static(b"\x01\x02")), KeyKind::Object);
    }

    #[test]
    fn test_short_wide_string_uses_wide_field() {
        // four chars, but UTF-16 needs 8 payload bytes
        assert_eq!(kind_for("日本語!"), KeyKind::WideString);
        assert_eq!(kind_for("日本"), KeyKind::NarrowString);
    }

    #[test]
    fn test_shape_follows_context() {
        let attrs = RegionAttributes::heap_only()
            .with_off_heap(1024)
            .with_versioning()
            .with_disk_lru(1024);
        let factory = RegionEntryFactory::for_context(&attrs);
        let entry = factory
            .create_entry(&attrs, RegionKey::Long(4_294_967_296), Bytes::from_static(b"v"))
            .unwrap();

        assert_eq!(entry.variant().name(), "long-key/off-heap/disk-lru/versioned");
        assert!(entry.is_off_heap());
        assert!(entry.is_evictable());
        assert_eq!(entry.location(), ValueLocation::OffHeap);
        entry.destroy(&attrs).unwrap();
    }

    #[test]
    fn test_inline_keys_disabled() {
        let attrs = RegionAttributes::heap_only().without_inline_keys();
        let factory = RegionEntryFactory::for_context(&attrs);
        let entry = factory
            .create_entry(&attrs, RegionKey::Int(5), Bytes::from_static(b"v"))
            .unwrap();
        assert_eq!(entry.variant().key, KeyKind::Object);
        assert_eq!(entry.key(), RegionKey::Int(5));
    }

    #[test]
    fn test_off_heap_shape_without_arena() {
        let attrs = RegionAttributes::heap_only();
        let factory = RegionEntryFactory::for_context(&attrs).make_off_heap();
        assert_matches!(
            factory.create_entry(&attrs, RegionKey::Int(1), Bytes::new()),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn test_sibling_factories() {
        let attrs = RegionAttributes::heap_only().with_off_heap(64);
        let factory = RegionEntryFactory::for_context(&attrs);
        assert!(factory.shape().is_off_heap());
        assert!(!factory.shape().versioned);

        let versioned = factory.make_versioned();
        assert!(versioned.shape().versioned);
        assert!(versioned.shape().is_off_heap());

        let heap = versioned.make_on_heap();
        assert_eq!(heap.shape().storage, StorageKind::Heap);
        assert!(heap.shape().versioned);

        assert!(heap.make_disk_lru().shape().is_evictable());
        assert_eq!(heap.make_off_heap().shape(), versioned.shape());
    }

    #[test]
    fn test_entry_class_overstates_inline_variants() {
        let attrs = RegionAttributes::heap_only();
        let factory = RegionEntryFactory::for_context(&attrs);
        let class = factory.entry_class();
        assert_eq!(class.variant.key, KeyKind::Object);

        let int_entry = factory
            .create_entry(&attrs, RegionKey::Int(1), Bytes::new())
            .unwrap();
        let generic = factory
            .create_entry(&attrs, RegionKey::from("x".repeat(40)), Bytes::new())
            .unwrap();

        // the reference size is exact for generic keys only
        assert_eq!(generic.footprint(), class.footprint);
        assert!(int_entry.footprint() < class.footprint);
        assert_eq!(
            class.footprint - int_entry.footprint(),
            KeyKind::Object.inline_bytes() + super::super::shape::KEY_OBJECT_HEADER_BYTES
                - KeyKind::Int.inline_bytes()
        );
    }

    #[test]
    fn test_creation_accounts_memory() {
        let attrs = RegionAttributes::heap_only();
        let factory = RegionEntryFactory::for_context(&attrs);
        factory
            .create_entry(&attrs, RegionKey::Int(1), Bytes::from_static(b"abcd"))
            .unwrap();
        assert_eq!(attrs.memory().heap_bytes(), 4);
        assert_eq!(attrs.memory().resident_entries(), 1);
    }
}
