// tests/property/hashrange_test.rs

//! JSON round-trip and ordering properties of hash-range points.

use clusterlib::core::hashrange::{HashRange, hash_string};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    #[test]
    fn uint64_round_trips_through_json(point in any::<u64>()) {
        let range = HashRange::Uint64(point);
        let json = range.to_json();
        prop_assert_eq!(HashRange::from_json(&json), range);
    }

    #[test]
    fn unknown_payloads_round_trip_opaquely(text in ".{0,64}") {
        // Strings are never a uint_64 representation, so they must be
        // preserved verbatim as opaque payloads.
        let payload = serde_json::Value::String(text);
        let range = HashRange::from_json(&payload);
        prop_assert_eq!(range.type_name(), "unknown");
        prop_assert_eq!(range.to_json(), payload);
    }

    #[test]
    fn next_is_monotonic_below_the_terminal(point in 0..u64::MAX) {
        let mut range = HashRange::Uint64(point);
        let before = range.clone();
        range.next();
        prop_assert!(before < range);
    }

    #[test]
    fn hash_fits_the_32_bit_image(input in ".{0,128}") {
        // The accumulator is 32 bits wide; the 64-bit result is its
        // zero-extension, and equal inputs agree.
        let h = hash_string(&input);
        prop_assert!(h <= u32::MAX as u64);
        prop_assert_eq!(h, hash_string(&input));
    }
}
