//! Region Keys
//!
//! Runtime key objects and their inline encodings.
//!
//! # Inline Encoding
//!
//! ```text
//! RegionKey ──KeyEncoder::encode──▶ Some(InlineKey)   stored in the entry record
//!           └───────────────────▶ None              stored as a generic key
//! ```
//!
//! Integers, longs and UUIDs always inline. Strings inline when their encoded
//! form fits one of two fixed fields (8 or 16 bytes, one of which holds the
//! length/encoding header).

mod inline;
#[cfg(test)]
mod proptest;

pub use inline::{
    max_inline_string_len, InlineKey, KeyEncoder, StringEncoding, NARROW_FIELD_BYTES,
    WIDE_FIELD_BYTES,
};

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A key object as handed to the region by callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegionKey {
    /// 32-bit signed integer key
    Int(i32),
    /// 64-bit signed integer key
    Long(i64),
    /// 128-bit UUID key
    Uuid(Uuid),
    /// String key
    String(String),
    /// Opaque serialized key object
    Bytes(Bytes),
}

impl RegionKey {
    /// Runtime category of this key, before any inlining decision.
    pub fn category(&self) -> KeyCategory {
        match self {
            RegionKey::Int(_) => KeyCategory::Int,
            RegionKey::Long(_) => KeyCategory::Long,
            RegionKey::Uuid(_) => KeyCategory::Uuid,
            RegionKey::String(_) => KeyCategory::String,
            RegionKey::Bytes(_) => KeyCategory::Object,
        }
    }

    /// Stable 64-bit identity hash used for map placement and disk slot checks.
    ///
    /// Hashes a category tag followed by the key's canonical bytes, so an
    /// `Int(1)` and a `Long(1)` never collide by construction.
    pub fn identity_hash(&self) -> u64 {
        let mut hasher = FxHasher::new();
        match self {
            RegionKey::Int(v) => {
                hasher.write_u8(1);
                hasher.write(&v.to_le_bytes());
            }
            RegionKey::Long(v) => {
                hasher.write_u8(2);
                hasher.write(&v.to_le_bytes());
            }
            RegionKey::Uuid(v) => {
                hasher.write_u8(3);
                hasher.write(v.as_bytes());
            }
            RegionKey::String(s) => {
                hasher.write_u8(4);
                hasher.write(s.as_bytes());
            }
            RegionKey::Bytes(b) => {
                hasher.write_u8(5);
                hasher.write(b);
            }
        }
        hasher.finish()
    }

    /// Approximate heap bytes held by the key object itself.
    pub fn heap_size(&self) -> usize {
        match self {
            RegionKey::String(s) => s.capacity(),
            RegionKey::Bytes(b) => b.len(),
            _ => 0,
        }
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKey::Int(v) => write!(f, "{}", v),
            RegionKey::Long(v) => write!(f, "{}L", v),
            RegionKey::Uuid(v) => write!(f, "{}", v),
            RegionKey::String(s) => write!(f, "{:?}", s),
            RegionKey::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i32> for RegionKey {
    fn from(v: i32) -> Self {
        RegionKey::Int(v)
    }
}

impl From<i64> for RegionKey {
    fn from(v: i64) -> Self {
        RegionKey::Long(v)
    }
}

impl From<Uuid> for RegionKey {
    fn from(v: Uuid) -> Self {
        RegionKey::Uuid(v)
    }
}

impl From<&str> for RegionKey {
    fn from(v: &str) -> Self {
        RegionKey::String(v.to_string())
    }
}

impl From<String> for RegionKey {
    fn from(v: String) -> Self {
        RegionKey::String(v)
    }
}

impl From<Bytes> for RegionKey {
    fn from(v: Bytes) -> Self {
        RegionKey::Bytes(v)
    }
}

/// Runtime category of a caller-supplied key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCategory {
    Int,
    Long,
    Uuid,
    String,
    Object,
}

/// Key representation chosen for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// Inline `i32`
    Int,
    /// Inline `i64`
    Long,
    /// Inline 128-bit UUID
    Uuid,
    /// Inline string in the 8-byte field
    NarrowString,
    /// Inline string in the 16-byte field
    WideString,
    /// Externally held key object
    Object,
}

impl KeyKind {
    /// Bytes the key occupies inside the entry record.
    pub fn inline_bytes(&self) -> usize {
        match self {
            KeyKind::Int => 4,
            KeyKind::Long => 8,
            KeyKind::Uuid => 16,
            KeyKind::NarrowString => NARROW_FIELD_BYTES,
            KeyKind::WideString => WIDE_FIELD_BYTES,
            // reference to the key object
            KeyKind::Object => std::mem::size_of::<usize>(),
        }
    }

    /// Short name used in variant descriptors.
    pub fn name(&self) -> &'static str {
        match self {
            KeyKind::Int => "int-key",
            KeyKind::Long => "long-key",
            KeyKind::Uuid => "uuid-key",
            KeyKind::NarrowString => "narrow-string-key",
            KeyKind::WideString => "wide-string-key",
            KeyKind::Object => "object-key",
        }
    }

    /// All key kinds, in factory dispatch order.
    pub fn all() -> [KeyKind; 6] {
        [
            KeyKind::Int,
            KeyKind::Long,
            KeyKind::Uuid,
            KeyKind::NarrowString,
            KeyKind::WideString,
            KeyKind::Object,
        ]
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// FxHash-style streaming hasher (non-cryptographic, fast).
pub(crate) struct FxHasher {
    hash: u64,
}

impl FxHasher {
    const SEED: u64 = 0x517cc1b727220a95;

    pub(crate) fn new() -> Self {
        Self { hash: Self::SEED }
    }

    #[inline]
    pub(crate) fn write_u8(&mut self, byte: u8) {
        self.hash = (self.hash.rotate_left(5) ^ byte as u64).wrapping_mul(Self::SEED);
    }

    #[inline]
    pub(crate) fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write_u8(byte);
        }
    }

    #[inline]
    pub(crate) fn finish(&self) -> u64 {
        self.hash
    }
}

/// One-shot FxHash of a byte slice.
pub(crate) fn fx_hash(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

// =============================================================================
// Tests
// =============================================================================
