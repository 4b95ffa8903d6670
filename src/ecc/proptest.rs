//! Property-Based Tests for the XOR Codec
//!
//! Uses proptest to verify the codec against its two load-bearing
//! guarantees:
//!
//! 1. **Fault Tolerance**: a block survives losing any set of whole
//!    suppliers up to the scheme's correctable budget
//! 2. **Fixability Agreement**: `EccMap::fixable` over a presence pattern
//!    answers exactly whether `read_block` can reassemble the block

#![cfg(test)]

use std::fs;

use proptest::prelude::*;
use tempfile::tempdir;

use super::codec::{XorCodec, PAD_BYTE};
use super::map::EccMap;
use crate::fragments::id::{local_file_name, FragmentKind};

// =============================================================================
// Strategies
// =============================================================================

/// Schemes small enough to exercise in file-backed tests.
fn scheme_strategy() -> impl Strategy<Value = EccMap> {
    prop::sample::select(vec!["ecc/2x2", "ecc/4x4", "ecc/7x7"])
        .prop_map(|name| EccMap::by_name(name).unwrap())
}

/// Block payloads of assorted sizes, most unaligned to the word size.
fn data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..2048)
}

/// A scheme plus a set of supplier positions to lose, within the budget.
fn scheme_and_losses() -> impl Strategy<Value = (EccMap, Vec<usize>)> {
    scheme_strategy().prop_flat_map(|map| {
        let suppliers = map.num_suppliers();
        let budget = map.correctable_errors();
        let losses = prop::collection::hash_set(0..suppliers, 0..=budget)
            .prop_map(|set| set.into_iter().collect::<Vec<_>>());
        (Just(map), losses)
    })
}

/// A scheme plus an arbitrary per-fragment presence pattern.
fn scheme_and_presence() -> impl Strategy<Value = (EccMap, Vec<bool>, Vec<bool>)> {
    scheme_strategy().prop_flat_map(|map| {
        let data = prop::collection::vec(any::<bool>(), map.data_segments());
        let parity = prop::collection::vec(any::<bool>(), map.parity_segments());
        (Just(map), data, parity)
    })
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Removing both fragments of up to `correctable_errors` suppliers must
    /// never prevent reassembly, and repaired segments must come back
    /// byte-identical.
    #[test]
    fn prop_block_survives_supplier_loss_within_budget(
        (map, losses) in scheme_and_losses(),
        data in data_strategy(),
    ) {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        fs::write(&source, &data).unwrap();
        let codec = XorCodec::new(map);
        codec.make_fragments(&source, 0, dir.path()).unwrap();

        let mut originals = Vec::new();
        for &supplier in &losses {
            let path = dir.path().join(local_file_name(0, supplier, FragmentKind::Data));
            originals.push((path.clone(), fs::read(&path).unwrap()));
            fs::remove_file(&path).unwrap();
            fs::remove_file(dir.path().join(local_file_name(0, supplier, FragmentKind::Parity)))
                .unwrap();
        }

        let target = dir.path().join("out.raid");
        codec.read_block(0, dir.path(), &target).unwrap();

        let out = fs::read(&target).unwrap();
        prop_assert_eq!(&out[..data.len()], &data[..]);
        prop_assert!(out[data.len()..].iter().all(|&b| b == PAD_BYTE));
        for (path, bytes) in originals {
            prop_assert_eq!(fs::read(&path).unwrap(), bytes);
        }
    }

    /// The fixability predicate and the file-level decoder implement the
    /// same repair walk, so they must agree on every presence pattern.
    #[test]
    fn prop_fixable_agrees_with_read_block(
        (map, data_present, parity_present) in scheme_and_presence(),
        data in data_strategy(),
    ) {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        fs::write(&source, &data).unwrap();
        let codec = XorCodec::new(map.clone());
        codec.make_fragments(&source, 0, dir.path()).unwrap();

        for (slot, present) in data_present.iter().enumerate() {
            if !present {
                fs::remove_file(dir.path().join(local_file_name(0, slot, FragmentKind::Data)))
                    .unwrap();
            }
        }
        for (slot, present) in parity_present.iter().enumerate() {
            if !present {
                fs::remove_file(dir.path().join(local_file_name(0, slot, FragmentKind::Parity)))
                    .unwrap();
            }
        }

        let target = dir.path().join("out.raid");
        let outcome = codec.read_block(0, dir.path(), &target);
        prop_assert_eq!(outcome.is_ok(), map.fixable(&data_present, &parity_present));
        if outcome.is_ok() {
            let out = fs::read(&target).unwrap();
            prop_assert_eq!(&out[..data.len()], &data[..]);
        }
    }
}
