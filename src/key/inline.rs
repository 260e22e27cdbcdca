//! Inline Key Encoder
//!
//! Packs primitive and short string keys directly into fixed-width fields.
//!
//! # String Field Layout
//!
//! ```text
//! byte 0                 bytes 1..N
//! ┌──────────────────┐   ┌───────────────────────────────────────┐
//! │ W │ length (7b)  │   │ payload: 1 byte/char (Latin-1)         │
//! └──────────────────┘   │       or 2 bytes/UTF-16 unit (W set)   │
//!                        └───────────────────────────────────────┘
//! ```
//!
//! The narrow field is one `u64` (7 payload bytes), the wide field two `u64`s
//! (15 payload bytes). Unused payload bytes are always zero, so two encodings
//! of the same key compare equal bit-for-bit.

use uuid::Uuid;

use super::{KeyKind, RegionKey};

/// Width of the narrow string field in bytes
pub const NARROW_FIELD_BYTES: usize = 8;

/// Width of the wide string field in bytes
pub const WIDE_FIELD_BYTES: usize = 16;

/// Header bit set when the payload holds UTF-16 code units
const WIDE_ENCODING_FLAG: u8 = 0x80;

/// Header bits holding the encoded length
const LENGTH_MASK: u8 = 0x7f;

/// Longest string (in chars or UTF-16 units) a field of `field_bytes` can hold.
pub const fn max_inline_string_len(field_bytes: usize, byte_encoded: bool) -> usize {
    let payload = field_bytes - 1;
    if byte_encoded {
        payload
    } else {
        payload / 2
    }
}

/// How a string key would be inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringEncoding {
    /// One byte per char (all chars in U+0000..=U+00FF)
    pub byte_encoded: bool,
    /// Encoded length: chars when byte encoded, UTF-16 units otherwise
    pub len: usize,
    /// Which inline field the string lands in
    pub kind: KeyKind,
}

/// A key packed into the entry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InlineKey {
    Int(i32),
    Long(i64),
    Uuid(u128),
    NarrowString(u64),
    WideString([u64; 2]),
}

impl InlineKey {
    /// Key representation this encoding corresponds to.
    pub fn kind(&self) -> KeyKind {
        match self {
            InlineKey::Int(_) => KeyKind::Int,
            InlineKey::Long(_) => KeyKind::Long,
            InlineKey::Uuid(_) => KeyKind::Uuid,
            InlineKey::NarrowString(_) => KeyKind::NarrowString,
            InlineKey::WideString(_) => KeyKind::WideString,
        }
    }

    /// Rebuild the original key object.
    pub fn decode(&self) -> RegionKey {
        match *self {
            InlineKey::Int(v) => RegionKey::Int(v),
            InlineKey::Long(v) => RegionKey::Long(v),
            InlineKey::Uuid(v) => RegionKey::Uuid(Uuid::from_u128(v)),
            InlineKey::NarrowString(bits) => RegionKey::String(unpack_string(&bits.to_le_bytes())),
            InlineKey::WideString([lo, hi]) => {
                let mut field = [0u8; WIDE_FIELD_BYTES];
                field[..8].copy_from_slice(&lo.to_le_bytes());
                field[8..].copy_from_slice(&hi.to_le_bytes());
                RegionKey::String(unpack_string(&field))
            }
        }
    }
}

/// Stateless encoder deciding whether and how a key can be inlined.
pub struct KeyEncoder;

impl KeyEncoder {
    /// Encode `key` inline, or `None` when it must stay a generic key.
    pub fn encode(key: &RegionKey) -> Option<InlineKey> {
        match key {
            RegionKey::Int(v) => Some(InlineKey::Int(*v)),
            RegionKey::Long(v) => Some(InlineKey::Long(*v)),
            RegionKey::Uuid(v) => Some(InlineKey::Uuid(v.as_u128())),
            RegionKey::String(s) => Self::encode_str(s),
            RegionKey::Bytes(_) => None,
        }
    }

    /// Inline kind `key` would get, without encoding it.
    pub fn kind_of(key: &RegionKey) -> KeyKind {
        match key {
            RegionKey::Int(_) => KeyKind::Int,
            RegionKey::Long(_) => KeyKind::Long,
            RegionKey::Uuid(_) => KeyKind::Uuid,
            RegionKey::String(s) => Self::classify_string(s)
                .map(|enc| enc.kind)
                .unwrap_or(KeyKind::Object),
            RegionKey::Bytes(_) => KeyKind::Object,
        }
    }

    /// Decide the string encoding from the actual content, not just its length.
    ///
    /// A three-character string of CJK text needs six payload bytes and still
    /// fits the narrow field; a four-character one does not.
    pub fn classify_string(s: &str) -> Option<StringEncoding> {
        let max_bytes = max_inline_string_len(WIDE_FIELD_BYTES, true);
        let mut chars = 0usize;
        let mut byte_encoded = true;
        for c in s.chars() {
            chars += 1;
            if chars > max_bytes {
                return None;
            }
            if c as u32 > 0xff {
                byte_encoded = false;
            }
        }

        let len = if byte_encoded {
            chars
        } else {
            s.encode_utf16().count()
        };

        let kind = if len <= max_inline_string_len(NARROW_FIELD_BYTES, byte_encoded) {
            KeyKind::NarrowString
        } else if len <= max_inline_string_len(WIDE_FIELD_BYTES, byte_encoded) {
            KeyKind::WideString
        } else {
            return None;
        };

        Some(StringEncoding {
            byte_encoded,
            len,
            kind,
        })
    }

    fn encode_str(s: &str) -> Option<InlineKey> {
        let encoding = Self::classify_string(s)?;
        match encoding.kind {
            KeyKind::NarrowString => {
                let mut field = [0u8; NARROW_FIELD_BYTES];
                pack_string(&mut field, s, encoding);
                Some(InlineKey::NarrowString(u64::from_le_bytes(field)))
            }
            KeyKind::WideString => {
                let mut field = [0u8; WIDE_FIELD_BYTES];
                pack_string(&mut field, s, encoding);
                let (lo, hi) = field.split_at(8);
                Some(InlineKey::WideString([
                    u64::from_le_bytes(lo.try_into().ok()?),
                    u64::from_le_bytes(hi.try_into().ok()?),
                ]))
            }
            _ => None,
        }
    }
}

fn pack_string(field: &mut [u8], s: &str, encoding: StringEncoding) {
    let mut header = encoding.len as u8 & LENGTH_MASK;
    let payload = &mut field[1..];
    if encoding.byte_encoded {
        for (slot, c) in payload.iter_mut().zip(s.chars()) {
            *slot = c as u32 as u8;
        }
    } else {
        header |= WIDE_ENCODING_FLAG;
        for (slot, unit) in payload.chunks_exact_mut(2).zip(s.encode_utf16()) {
            slot.copy_from_slice(&unit.to_le_bytes());
        }
    }
    field[0] = header;
}

fn unpack_string(field: &[u8]) -> String {
    let header = field[0];
    let payload = &field[1..];
    // hand-built fields may claim more than the payload holds
    let len = ((header & LENGTH_MASK) as usize).min(payload.len());
    if header & WIDE_ENCODING_FLAG == 0 {
        payload[..len].iter().map(|&b| b as char).collect()
    } else {
        let units: Vec<u16> = payload
            .chunks_exact(2)
            .take(len)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(key: RegionKey) -> InlineKey {
        let inline = KeyEncoder::encode(&key).expect("key should inline");
        assert_eq!(inline.decode(), key);
        inline
    }

    #[test]
    fn test_overlong_header_is_clamped() {
        assert_eq!(
            InlineKey::NarrowString(0x7f).decode(),
            RegionKey::String("\0".repeat(7))
        );
        assert_eq!(
            InlineKey::NarrowString(0x7f | ((b'a' as u64) << 8)).decode(),
            RegionKey::String(format!("a{}", "\0".repeat(6)))
        );
        // wide header claiming 127 units over a 15-byte payload
        assert_eq!(
            InlineKey::WideString([0xff, 0]).decode(),
            RegionKey::String("\0".repeat(7))
        );
    }

    #[test]
    fn test_max_inline_lengths() {
        assert_eq!(max_inline_string_len(NARROW_FIELD_BYTES, true), 7);
        assert_eq!(max_inline_string_len(NARROW_FIELD_BYTES, false), 3);
        assert_eq!(max_inline_string_len(WIDE_FIELD_BYTES, true), 15);
        assert_eq!(max_inline_string_len(WIDE_FIELD_BYTES, false), 7);
    }

    #[test]
    fn test_primitive_keys_inline() {
        assert_eq!(roundtrip(RegionKey::Int(i32::MIN)).kind(), KeyKind::Int);
        assert_eq!(roundtrip(RegionKey::Long(4294967296)).kind(), KeyKind::Long);
        let id = Uuid::from_u128(0x0123_4567_89ab_cdef_fedc_ba98_7654_3210);
        assert_eq!(roundtrip(RegionKey::Uuid(id)).kind(), KeyKind::Uuid);
    }

    #[test]
    fn test_short_ascii_is_narrow() {
        let inline = roundtrip(RegionKey::from("short"));
        assert_eq!(inline.kind(), KeyKind::NarrowString);

        let enc = KeyEncoder::classify_string("short").unwrap();
        assert!(enc.byte_encoded);
        assert_eq!(enc.len, 5);
    }

    #[test]
    fn test_tier_boundaries_byte_encoded() {
        assert_eq!(roundtrip(RegionKey::from("1234567")).kind(), KeyKind::NarrowString);
        assert_eq!(roundtrip(RegionKey::from("12345678")).kind(), KeyKind::WideString);
        assert_eq!(
            roundtrip(RegionKey::from("123456789012345")).kind(),
            KeyKind::WideString
        );
        assert!(KeyEncoder::encode(&RegionKey::from("1234567890123456")).is_none());
    }

    #[test]
    fn test_latin1_stays_byte_encoded() {
        let enc = KeyEncoder::classify_string("café").unwrap();
        assert!(enc.byte_encoded);
        assert_eq!(enc.len, 4);
        roundtrip(RegionKey::from("ÿüéñ"));
    }

    #[test]
    fn test_short_string_can_need_wide_field() {
        // 4 chars, but outside Latin-1: 8 payload bytes > 7
        let enc = KeyEncoder::classify_string("日本語だ").unwrap();
        assert!(!enc.byte_encoded);
        assert_eq!(enc.kind, KeyKind::WideString);
        roundtrip(RegionKey::from("日本語だ"));

        // 3 wide chars still fit the narrow field
        assert_eq!(roundtrip(RegionKey::from("日本語")).kind(), KeyKind::NarrowString);
    }

    #[test]
    fn test_mixed_content_uses_actual_encodability() {
        // 5 chars would be narrow if Latin-1, but one char forces UTF-16
        let mixed = "abcd€";
        assert_eq!(KeyEncoder::kind_of(&RegionKey::from(mixed)), KeyKind::WideString);
        assert_eq!(KeyEncoder::kind_of(&RegionKey::from("abcde")), KeyKind::NarrowString);
        roundtrip(RegionKey::from(mixed));
    }

    #[test]
    fn test_surrogate_pairs_roundtrip() {
        // Each emoji is two UTF-16 units
        let key = RegionKey::from("😀😀😀");
        let inline = roundtrip(key);
        assert_eq!(inline.kind(), KeyKind::WideString);
        assert!(KeyEncoder::encode(&RegionKey::from("😀😀😀😀")).is_none());
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(roundtrip(RegionKey::from("")).kind(), KeyKind::NarrowString);
    }

    #[test]
    fn test_trailing_nul_preserved() {
        // Length is recorded, so trailing zero chars are not confused with padding
        roundtrip(RegionKey::from("ab\0"));
        roundtrip(RegionKey::from("\0"));
        assert_ne!(
            KeyEncoder::encode(&RegionKey::from("ab")),
            KeyEncoder::encode(&RegionKey::from("ab\0"))
        );
    }

    #[test]
    fn test_opaque_keys_not_inlined() {
        let key = RegionKey::from(bytes::Bytes::from_static(b"k"));
        assert!(KeyEncoder::encode(&key).is_none());
        assert_eq!(KeyEncoder::kind_of(&key), KeyKind::Object);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = KeyEncoder::encode(&RegionKey::from("wide-key-12")).unwrap();
        let b = KeyEncoder::encode(&RegionKey::from("wide-key-12")).unwrap();
        assert_eq!(a, b);
    }
}
