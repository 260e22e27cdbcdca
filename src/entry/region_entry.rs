//! The entry record and its tier transitions
//!
//! # Locking
//!
//! Every transition of the value tag holds the entry's state lock:
//!
//! ```text
//! update    lock ─ allocate new ─ swap tag ─ release old ─ unlock
//! evict     try_lock ─ persist ─ swap tag to Disk ─ release memory ─ unlock
//! recall    lock ─ read slot ─ allocate ─ swap tag ─ free slot ─ unlock
//! read      lock ─ retain (guard) ─ unlock ─ copy ─ release (guard drop)
//! ```
//!
//! New storage is always installed before the old reference is given up, so a
//! failure at any step leaves the previous tag intact.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::shape::{EntryVariant, StorageKind};
use super::value::{decode_value, encode_value, ValueLocation, ValueRef};
use crate::context::RegionContext;
use crate::disk::DiskToken;
use crate::error::{Error, Result};
use crate::key::{InlineKey, KeyEncoder, RegionKey};
use crate::offheap::{OffHeapArena, OffHeapGuard};
use crate::stats::StatEvent;

/// How the entry holds its key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKey {
    /// Packed into the record
    Inline(InlineKey),
    /// Generic key object
    Object(RegionKey),
}

impl EntryKey {
    /// Rebuild the caller-facing key
    pub fn to_key(&self) -> RegionKey {
        match self {
            EntryKey::Inline(inline) => inline.decode(),
            EntryKey::Object(key) => key.clone(),
        }
    }

    pub fn matches(&self, key: &RegionKey) -> bool {
        match self {
            EntryKey::Inline(inline) => KeyEncoder::encode(key).as_ref() == Some(inline),
            EntryKey::Object(held) => held == key,
        }
    }
}

/// Result of [`RegionEntry::read`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRead {
    Value { value: Bytes, version: u64 },
    /// Value must be recalled first
    OnDisk,
}

/// Result of [`RegionEntry::try_evict`]
#[derive(Debug)]
pub enum EvictOutcome {
    /// Value moved to disk, freeing this many bytes
    Evicted(usize),
    /// Another thread holds the entry
    Busy,
    /// Already on disk or destroyed
    NotResident,
    /// Entry stays resident
    Failed(Error),
}

/// Result of [`RegionEntry::recall`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recalled {
    pub value: Bytes,
    pub version: u64,
    /// False when another thread had already brought the value back
    pub from_disk: bool,
}

/// Value pinned for a read after the entry lock is dropped
enum Held {
    Heap(Bytes),
    OffHeap(OffHeapGuard),
}

struct EntryState {
    value: ValueRef,
    version: u64,
    compressed: bool,
}

/// One key/value record
pub struct RegionEntry {
    key: EntryKey,
    key_hash: u64,
    variant: EntryVariant,
    sequence: u64,
    evicting: AtomicBool,
    destroyed: AtomicBool,
    state: Mutex<EntryState>,
}

impl RegionEntry {
    pub(crate) fn new(
        key: EntryKey,
        key_hash: u64,
        variant: EntryVariant,
        sequence: u64,
        value: ValueRef,
        compressed: bool,
    ) -> Self {
        Self {
            key,
            key_hash,
            variant,
            sequence,
            evicting: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            state: Mutex::new(EntryState {
                value,
                version: 1,
                compressed,
            }),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn key(&self) -> RegionKey {
        self.key.to_key()
    }

    pub fn entry_key(&self) -> &EntryKey {
        &self.key
    }

    pub fn key_hash(&self) -> u64 {
        self.key_hash
    }

    pub fn matches(&self, key: &RegionKey) -> bool {
        self.key.matches(key)
    }

    pub fn variant(&self) -> EntryVariant {
        self.variant
    }

    /// Insertion order within the region
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_off_heap(&self) -> bool {
        self.variant.shape.is_off_heap()
    }

    pub fn is_evictable(&self) -> bool {
        self.variant.shape.is_evictable()
    }

    /// Version stamp, for versioned variants only
    pub fn version(&self) -> Option<u64> {
        self.variant
            .shape
            .versioned
            .then(|| self.state.lock().version)
    }

    pub fn location(&self) -> ValueLocation {
        self.state.lock().value.location()
    }

    pub fn is_compressed(&self) -> bool {
        self.state.lock().compressed
    }

    /// Whether a persist for this entry is in flight
    pub fn is_evicting(&self) -> bool {
        self.evicting.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Off-heap bytes owned by this entry
    pub fn off_heap_bytes(&self) -> usize {
        match &self.state.lock().value {
            ValueRef::OffHeap(token) => token.len(),
            _ => 0,
        }
    }

    /// Bytes of the record itself for this entry's variant.
    pub fn footprint(&self) -> usize {
        self.variant.footprint()
    }

    // =========================================================================
    // Reads and Writes
    // =========================================================================

    /// Read the current value.
    ///
    /// An off-heap value is retained before the lock is dropped and released
    /// once it has been copied.
    pub fn read(&self, ctx: &dyn RegionContext) -> Result<EntryRead> {
        let (held, compressed, version) = {
            let state = self.state.lock();
            let held = match &state.value {
                ValueRef::Heap(bytes) => Held::Heap(bytes.clone()),
                ValueRef::OffHeap(token) => Held::OffHeap(arena(ctx)?.acquire(token)?),
                ValueRef::Disk(_) => return Ok(EntryRead::OnDisk),
                ValueRef::Invalid => return Err(Error::EntryDestroyed),
            };
            (held, state.compressed, state.version)
        };

        let stored = match held {
            Held::Heap(bytes) => bytes,
            Held::OffHeap(guard) => guard.to_bytes(),
        };

        Ok(EntryRead::Value {
            value: decode_value(ctx, stored, compressed)?,
            version,
        })
    }

    /// Replace the value and bump the version.
    ///
    /// On error the entry keeps its previous value. A value on disk is
    /// superseded without being recalled.
    pub fn update(&self, ctx: &dyn RegionContext, value: &Bytes) -> Result<u64> {
        let mut state = self.state.lock();
        if let ValueRef::Invalid = state.value {
            return Err(Error::EntryDestroyed);
        }

        let (stored, compressed) = encode_value(ctx, value);
        let fresh = match (self.variant.shape.storage, &state.value) {
            (StorageKind::OffHeap, ValueRef::OffHeap(old)) => {
                ValueRef::OffHeap(arena(ctx)?.replace(old, &stored)?)
            }
            (StorageKind::OffHeap, _) => ValueRef::OffHeap(arena(ctx)?.allocate_from(&stored)?),
            (StorageKind::Heap, _) => {
                ctx.memory().add_heap(stored.len());
                ValueRef::Heap(stored)
            }
        };

        match std::mem::replace(&mut state.value, fresh) {
            ValueRef::Heap(old) => ctx.memory().sub_heap(old.len()),
            // count already given up by `replace`
            ValueRef::OffHeap(_) => {}
            ValueRef::Disk(token) => {
                ctx.memory().entry_resident();
                self.free_slot(ctx, token);
            }
            ValueRef::Invalid => {}
        }

        state.compressed = compressed;
        state.version += 1;
        Ok(state.version)
    }

    // =========================================================================
    // Tier Transitions
    // =========================================================================

    /// Evict unless another thread holds the entry.
    pub fn try_evict(&self, ctx: &dyn RegionContext) -> EvictOutcome {
        match self.state.try_lock() {
            Some(mut state) => self.evict_locked(ctx, &mut state),
            None => EvictOutcome::Busy,
        }
    }

    /// Evict, waiting for the entry lock.
    pub fn evict(&self, ctx: &dyn RegionContext) -> EvictOutcome {
        let mut state = self.state.lock();
        self.evict_locked(ctx, &mut state)
    }

    fn evict_locked(
        &self,
        ctx: &dyn RegionContext,
        state: &mut MutexGuard<'_, EntryState>,
    ) -> EvictOutcome {
        let store = match (self.is_evictable(), ctx.overflow()) {
            (true, Some(store)) => store,
            _ => {
                return EvictOutcome::Failed(Error::NotEvictable(format!(
                    "{} entry for key {}",
                    self.variant,
                    self.key()
                )))
            }
        };

        let data = match &state.value {
            ValueRef::Heap(bytes) => bytes.clone(),
            ValueRef::OffHeap(token) => match arena(ctx).and_then(|a| a.read(token)) {
                Ok(bytes) => bytes,
                Err(e) => return EvictOutcome::Failed(e),
            },
            ValueRef::Disk(_) | ValueRef::Invalid => return EvictOutcome::NotResident,
        };

        self.evicting.store(true, Ordering::Release);
        let persisted = store.persist(self.key_hash, state.version, &data);
        self.evicting.store(false, Ordering::Release);

        let token = match persisted {
            Ok(token) => token,
            Err(e) => return EvictOutcome::Failed(e),
        };

        let freed = data.len();
        match std::mem::replace(&mut state.value, ValueRef::Disk(token)) {
            ValueRef::Heap(old) => ctx.memory().sub_heap(old.len()),
            ValueRef::OffHeap(old) => {
                if let Err(e) = arena(ctx).and_then(|a| a.release(&old)) {
                    // tag already points at disk; the value is safe
                    warn!(key = %self.key(), "releasing evicted block failed: {}", e);
                }
            }
            ValueRef::Disk(_) | ValueRef::Invalid => {}
        }
        ctx.memory().entry_departed();
        ctx.stats().record(StatEvent::Evicted {
            bytes: freed as u64,
        });
        debug!(key = %self.key(), ?token, bytes = freed, "evicted entry to disk");

        EvictOutcome::Evicted(freed)
    }

    /// Bring an evicted value back into memory and return it.
    ///
    /// Fails with [`Error::OutOfOffHeapMemory`] when the arena is full (the
    /// caller may make room and retry) and with [`Error::RecallFailed`] when
    /// the slot cannot be read.
    pub fn recall(&self, ctx: &dyn RegionContext) -> Result<Recalled> {
        let mut state = self.state.lock();

        let token = match &state.value {
            ValueRef::Disk(token) => *token,
            ValueRef::Invalid => return Err(Error::EntryDestroyed),
            ValueRef::Heap(bytes) => {
                let value = decode_value(ctx, bytes.clone(), state.compressed)?;
                return Ok(Recalled {
                    value,
                    version: state.version,
                    from_disk: false,
                });
            }
            ValueRef::OffHeap(token) => {
                let stored = arena(ctx)?.read(token)?;
                let value = decode_value(ctx, stored, state.compressed)?;
                return Ok(Recalled {
                    value,
                    version: state.version,
                    from_disk: false,
                });
            }
        };

        let store = ctx
            .overflow()
            .ok_or_else(|| Error::NotEvictable("region has no overflow store".into()))?;
        let slot = store.recall(token).map_err(|e| self.recall_failed(e.to_string()))?;

        if slot.key_hash != self.key_hash {
            return Err(self.recall_failed(format!("{:?} belongs to another key", token)));
        }
        if slot.version != state.version {
            return Err(self.recall_failed(format!(
                "{:?} holds version {}, entry is at {}",
                token, slot.version, state.version
            )));
        }

        let resident = match self.variant.shape.storage {
            StorageKind::OffHeap => ValueRef::OffHeap(arena(ctx)?.allocate_from(&slot.bytes)?),
            StorageKind::Heap => {
                ctx.memory().add_heap(slot.bytes.len());
                ValueRef::Heap(slot.bytes.clone())
            }
        };
        state.value = resident;
        ctx.memory().entry_resident();
        self.free_slot(ctx, token);

        ctx.stats().record(StatEvent::Recalled {
            bytes: slot.bytes.len() as u64,
        });
        debug!(key = %self.key(), ?token, "recalled entry from disk");

        let (compressed, version) = (state.compressed, state.version);
        drop(state);

        Ok(Recalled {
            value: decode_value(ctx, slot.bytes, compressed)?,
            version,
            from_disk: true,
        })
    }

    /// Release every resource and mark the entry invalid.
    ///
    /// Idempotent; later operations fail with [`Error::EntryDestroyed`].
    pub fn destroy(&self, ctx: &dyn RegionContext) -> Result<()> {
        let mut state = self.state.lock();
        self.destroyed.store(true, Ordering::Release);

        match std::mem::replace(&mut state.value, ValueRef::Invalid) {
            ValueRef::Heap(old) => {
                ctx.memory().sub_heap(old.len());
                ctx.memory().entry_departed();
            }
            ValueRef::OffHeap(old) => {
                ctx.memory().entry_departed();
                arena(ctx)?.release(&old)?;
            }
            ValueRef::Disk(token) => self.free_slot(ctx, token),
            ValueRef::Invalid => {}
        }
        Ok(())
    }

    fn free_slot(&self, ctx: &dyn RegionContext, token: DiskToken) {
        let freed = ctx
            .overflow()
            .ok_or_else(|| Error::NotEvictable("region has no overflow store".into()))
            .and_then(|store| store.free(token));
        if let Err(e) = freed {
            warn!(key = %self.key(), ?token, "failed to free overflow slot: {}", e);
        }
    }

    fn recall_failed(&self, reason: String) -> Error {
        Error::RecallFailed {
            key: self.key().to_string(),
            reason,
        }
    }
}

impl fmt::Debug for RegionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionEntry")
            .field("key", &self.key)
            .field("variant", &self.variant.name())
            .field("sequence", &self.sequence)
            .field("location", &self.state.try_lock().map(|s| s.value.location()))
            .finish()
    }
}

fn arena(ctx: &dyn RegionContext) -> Result<&OffHeapArena> {
    ctx.off_heap()
        .ok_or_else(|| Error::Config("off-heap storage is not enabled".into()))
}
