//! Property-Based Tests for Inline Keys
//!
//! # Test Properties
//!
//! 1. **Roundtrip**: decode(encode(k)) == k for every inlineable key
//! 2. **Exact length**: inline strings never lose or gain trailing chars
//! 3. **Field fit**: the chosen field is the narrowest that holds the encoding
//! 4. **Variant stability**: the factory picks the same variant for a key every time

#![cfg(test)]

use proptest::prelude::*;
use uuid::Uuid;

use super::{max_inline_string_len, KeyEncoder, KeyKind, RegionKey};
use super::{NARROW_FIELD_BYTES, WIDE_FIELD_BYTES};
use crate::context::RegionAttributes;
use crate::entry::RegionEntryFactory;

// =============================================================================
// Strategies
// =============================================================================

/// Latin-1 strings short enough to inline.
fn latin1_string_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(0u32..=0xff, 0..=15)
        .prop_map(|cps| cps.into_iter().filter_map(char::from_u32).collect())
}

/// Arbitrary strings, including ones too long or too wide to inline.
fn any_string_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(any::<char>(), 0..24).prop_map(|cs| cs.into_iter().collect())
}

fn region_key_strategy() -> impl Strategy<Value = RegionKey> {
    prop_oneof![
        any::<i32>().prop_map(RegionKey::Int),
        any::<i64>().prop_map(RegionKey::Long),
        any::<u128>().prop_map(|v| RegionKey::Uuid(Uuid::from_u128(v))),
        any_string_strategy().prop_map(RegionKey::String),
        latin1_string_strategy().prop_map(RegionKey::String),
    ]
}

// =============================================================================
// Roundtrip Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: every key that inlines decodes back to itself.
    #[test]
    fn prop_inline_roundtrip(key in region_key_strategy()) {
        if let Some(inline) = KeyEncoder::encode(&key) {
            prop_assert_eq!(inline.decode(), key);
        }
    }

    /// Property: Latin-1 strings up to 15 chars always inline, byte encoded.
    #[test]
    fn prop_latin1_always_inlines(s in latin1_string_strategy()) {
        let enc = KeyEncoder::classify_string(&s);
        prop_assert!(enc.is_some());
        let enc = enc.unwrap();
        prop_assert!(enc.byte_encoded);
        prop_assert_eq!(enc.len, s.chars().count());
    }

    /// Property: the narrow field is chosen exactly when the encoding fits it.
    #[test]
    fn prop_narrowest_field_wins(s in any_string_strategy()) {
        match KeyEncoder::classify_string(&s) {
            Some(enc) => {
                let narrow_max = max_inline_string_len(NARROW_FIELD_BYTES, enc.byte_encoded);
                let wide_max = max_inline_string_len(WIDE_FIELD_BYTES, enc.byte_encoded);
                prop_assert!(enc.len <= wide_max);
                prop_assert_eq!(enc.kind == KeyKind::NarrowString, enc.len <= narrow_max);
            }
            None => {
                let latin1 = s.chars().all(|c| (c as u32) <= 0xff);
                let len = if latin1 { s.chars().count() } else { s.encode_utf16().count() };
                prop_assert!(len > max_inline_string_len(WIDE_FIELD_BYTES, latin1));
            }
        }
    }

    /// Property: inline keys compare equal iff the keys are equal.
    #[test]
    fn prop_inline_equality_matches_key_equality(
        a in region_key_strategy(),
        b in region_key_strategy(),
    ) {
        if let (Some(ia), Some(ib)) = (KeyEncoder::encode(&a), KeyEncoder::encode(&b)) {
            prop_assert_eq!(ia == ib, a == b);
        }
    }
}

// =============================================================================
// Factory Stability
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: repeated factory calls pick the same variant for the same key.
    #[test]
    fn prop_factory_variant_is_stable(key in region_key_strategy()) {
        let attrs = RegionAttributes::heap_only();
        let factory = RegionEntryFactory::for_context(&attrs);

        let first = factory.create_entry(&attrs, key.clone(), bytes::Bytes::from_static(b"v")).unwrap();
        let second = factory.create_entry(&attrs, key.clone(), bytes::Bytes::from_static(b"v")).unwrap();

        prop_assert_eq!(first.variant(), second.variant());
        prop_assert_eq!(first.variant().key, KeyEncoder::kind_of(&key));
        prop_assert_eq!(first.key(), key);
    }
}
