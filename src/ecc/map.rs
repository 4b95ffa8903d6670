//! XOR Parity Scheme Tables
//!
//! Every backup block is split into N data fragments and N parity fragments,
//! one pair per supplier. A scheme is a parity-to-data matrix: row `p` lists
//! the data segment numbers XOR-ed together to produce parity segment `p`.
//! The schemes shipped here are the published family `ecc/2x2` .. `ecc/64x64`;
//! they are data, not code, and must never be edited without re-running the
//! coverage analysis that produced them.
//!
//! [`EccMap`] wraps one scheme and answers the two questions the restore
//! pipeline keeps asking:
//!
//! - `fixable`: given which fragments are on hand, can iterative single-miss
//!   XOR repair recover every data segment?
//! - `can_make_progress`: is there at least one repair step available right
//!   now (used by the rebuilder to decide whether another pass is worth it)?

use crate::error::{Error, Result};

// =============================================================================
// Scheme Tables
// =============================================================================

static MAP_2X2: &[&[usize]] = &[&[1], &[0]];

static MAP_4X4: &[&[usize]] = &[&[1, 2, 3], &[0, 2], &[0, 3], &[0, 1]];

static MAP_7X7: &[&[usize]] = &[
    &[3, 4, 6],
    &[0, 4, 5],
    &[1, 5, 6],
    &[0, 2, 6],
    &[0, 1, 3],
    &[1, 2, 4],
    &[2, 3, 5],
];

static MAP_13X13: &[&[usize]] = &[
    &[1, 4, 8, 12],
    &[5, 8, 9, 11],
    &[3, 7, 10, 11],
    &[0, 4, 6, 9],
    &[2, 3, 6, 12],
    &[0, 1, 6, 10],
    &[1, 3, 7, 9],
    &[2, 5, 8, 12],
    &[2, 4, 7, 11],
    &[0, 1, 3, 5, 12],
    &[6, 7, 8],
    &[2, 5, 9, 10],
    &[0, 4, 10, 11],
];

static MAP_18X18: &[&[usize]] = &[
    &[5, 7, 11, 16, 17],
    &[2, 9, 11, 13, 17],
    &[5, 8, 9, 13, 15],
    &[0, 1, 4, 6, 10],
    &[2, 3, 12, 13, 14],
    &[6, 8, 13, 17],
    &[2, 5, 10, 12],
    &[3, 10, 11, 14],
    &[0, 1, 3, 4, 5, 6, 7, 9, 10, 11, 13, 14, 15, 16, 17],
    &[0, 1, 12, 14],
    &[5, 6, 8, 14, 16],
    &[0, 4, 7, 9],
    &[2, 4, 7, 8],
    &[3, 4, 6, 11, 15],
    &[0, 10, 15, 16],
    &[1, 2, 17],
    &[3, 8, 12, 15],
    &[1, 7, 9, 12, 16],
];

static MAP_26X26: &[&[usize]] = &[
    &[1, 8, 11, 16, 19, 21],
    &[3, 6, 8, 17, 23],
    &[6, 7, 11, 17, 21, 25],
    &[0, 10, 13, 14, 21],
    &[5, 9, 10, 18, 22],
    &[12, 13, 17, 20, 21, 22],
    &[1, 2, 9, 13],
    &[2, 3, 5, 9, 20, 22],
    &[0, 6, 9, 12, 15, 25],
    &[2, 7, 14, 15, 16, 24],
    &[2, 5, 6, 11, 15, 16, 18, 19, 23],
    &[2, 10, 12, 13, 14, 20, 23],
    &[0, 3, 4, 11, 19],
    &[0, 1, 4, 18, 19, 20, 23, 25],
    &[1, 5, 7, 11, 20, 21, 25],
    &[1, 4, 16, 17, 18],
    &[2, 4, 11, 22, 24],
    &[5, 12, 13, 14, 16, 24],
    &[3, 7, 10, 20, 22, 24, 25],
    &[0, 8, 10, 12, 17],
    &[0, 8, 9, 17, 19, 22, 25],
    &[4, 5, 15, 16, 22],
    &[6, 8, 12, 14, 15, 18, 23],
    &[1, 3, 7, 13, 19, 24],
    &[0, 3, 4, 7, 14, 15, 21, 23],
    &[6, 8, 9, 10, 18, 24],
];

static MAP_64X64: &[&[usize]] = &[
    &[5, 17, 18, 31, 39, 47, 55, 58],
    &[0, 3, 4, 25, 27, 32, 34, 48, 53, 56, 63],
    &[10, 11, 17, 18, 25, 32, 36, 40, 45, 51],
    &[1, 21, 23, 27, 30, 35, 43, 47, 62],
    &[2, 19, 20, 21, 28, 29, 37, 38, 40, 55, 56, 62],
    &[15, 17, 19, 20, 31, 45, 46, 54, 57, 63],
    &[19, 20, 30, 36, 46, 47, 52, 62],
    &[2, 5, 16, 18, 19, 37, 48, 55],
    &[1, 2, 7, 12, 13, 20, 26, 28, 48, 55],
    &[0, 1, 15, 21, 24, 33, 36, 41, 56, 62],
    &[19, 20, 28, 30, 43, 45, 52, 57, 59],
    &[2, 6, 12, 20, 34, 58, 61, 63],
    &[5, 6, 13, 15, 25, 34, 36, 40, 42, 43, 50, 51, 55, 61, 62],
    &[21, 22, 23, 34, 39, 41, 43, 45, 49, 52, 53, 58],
    &[0, 12, 17, 19, 28, 57, 58, 63],
    &[8, 18, 25, 29, 34, 49, 52, 53, 56, 62],
    &[3, 6, 19, 23, 35, 39, 40, 43, 49, 54, 57],
    &[2, 3, 8, 9, 30, 31, 47, 54, 58, 62],
    &[0, 8, 14, 24, 28, 33, 36, 47, 52, 58],
    &[8, 10, 13, 22, 25, 27, 32, 35, 40, 51, 56],
    &[2, 14, 16, 17, 26, 27, 29, 31, 43, 46, 54, 56],
    &[22, 25, 37, 41, 45, 52, 61],
    &[5, 9, 13, 32, 46, 50, 54, 62],
    &[0, 4, 5, 10, 15, 16, 26, 36, 37, 48, 50],
    &[13, 14, 20, 21, 40, 42, 55, 60],
    &[1, 2, 13, 15, 16, 19, 26, 30, 37, 42, 48, 50, 59],
    &[4, 10, 11, 18, 28, 30, 44, 45, 46, 60, 63],
    &[2, 6, 16, 22, 24, 38, 41, 53, 59],
    &[6, 15, 21, 23, 26, 29, 32, 34, 35, 36, 38, 43, 51, 54, 60],
    &[13, 24, 32, 33, 34, 41, 46, 52, 58, 61],
    &[1, 10, 23, 24, 27, 29, 40, 41, 61],
    &[4, 5, 6, 10, 14, 42, 44, 48, 51, 53, 61],
    &[0, 5, 7, 15, 49, 50],
    &[8, 29, 35, 36, 43, 47, 51, 60, 62],
    &[7, 12, 15, 21, 22, 27, 31, 33, 57, 60],
    &[5, 16, 18, 24, 26, 33, 38, 44, 46, 53, 56, 57, 61],
    &[1, 3, 4, 9, 24, 27, 31, 39, 50, 51, 54, 58],
    &[12, 18, 22, 23, 27, 35, 36, 44, 60, 63],
    &[0, 12, 17, 20, 32, 35, 37, 50, 53, 59],
    &[8, 11, 14, 16, 22, 24, 35, 36, 41, 42, 44, 46, 57],
    &[14, 23, 30, 33, 34, 38, 42, 44, 46, 48, 54],
    &[9, 14, 27, 31, 33, 35, 49, 51, 52, 54],
    &[3, 8, 11, 12, 14, 30, 32, 34, 48, 56, 62],
    &[7, 9, 29, 44, 46, 58],
    &[6, 18, 21, 26, 28, 39, 40, 45, 47, 55, 58, 63],
    &[4, 17, 21, 26, 30, 34, 54, 61],
    &[0, 5, 6, 10, 23, 29, 39, 55, 60],
    &[7, 9, 10, 11, 12, 18, 25, 26, 29, 37, 38, 39, 42, 45, 49],
    &[6, 7, 17, 27, 33, 56, 59, 60],
    &[1, 3, 9, 14, 20, 28, 42, 47, 57, 63],
    &[11, 17, 23, 25, 39, 41, 45, 53, 56, 57, 60, 61, 63],
    &[4, 8, 12, 16, 19, 28, 31, 32, 47],
    &[2, 4, 22, 23, 26, 39, 41, 42, 51, 59],
    &[0, 3, 9, 13, 25, 40, 43],
    &[0, 9, 10, 16, 22, 47, 53, 55],
    &[1, 3, 4, 7, 13, 20, 21, 25, 49, 50],
    &[6, 12, 15, 16, 17, 29, 33, 38, 48, 50, 55, 57, 59],
    &[1, 15, 24, 28, 37, 40, 42, 52],
    &[1, 4, 7, 13, 14, 30, 38, 59],
    &[11, 31, 33, 37, 44, 49, 51, 52],
    &[8, 11, 24, 31, 32, 35, 50, 53, 59, 63],
    &[3, 8, 11, 18, 22, 38, 44, 49],
    &[7, 9, 10, 19, 37, 41, 44, 45, 49, 60, 61],
    &[2, 3, 5, 7, 11, 38, 39, 43, 48, 59],
];

/// Registered schemes: (name, supplier count, correctable errors, matrix).
static SCHEMES: &[(&str, usize, usize, &[&[usize]])] = &[
    ("ecc/2x2", 2, 1, MAP_2X2),
    ("ecc/4x4", 4, 2, MAP_4X4),
    ("ecc/7x7", 7, 3, MAP_7X7),
    ("ecc/13x13", 13, 4, MAP_13X13),
    ("ecc/18x18", 18, 5, MAP_18X18),
    ("ecc/26x26", 26, 6, MAP_26X26),
    ("ecc/64x64", 64, 10, MAP_64X64),
];

/// Supplier counts a scheme exists for, ascending.
pub const SUPPLIER_COUNTS: &[usize] = &[2, 4, 7, 13, 18, 26, 64];

/// Supplier count used when nothing else pins the scheme down.
pub const DEFAULT_SUPPLIER_COUNT: usize = 2;

/// Scheme name for a supplier count, if one is registered.
pub fn scheme_name_for(suppliers: usize) -> Option<&'static str> {
    SCHEMES
        .iter()
        .find(|(_, n, _, _)| *n == suppliers)
        .map(|(name, _, _, _)| *name)
}

/// Correctable-error count for a supplier count, if a scheme is registered.
pub fn correctable_errors_for(suppliers: usize) -> Option<usize> {
    SCHEMES
        .iter()
        .find(|(_, n, _, _)| *n == suppliers)
        .map(|(_, _, ce, _)| *ce)
}

// =============================================================================
// EccMap
// =============================================================================

/// One resolved parity scheme plus its derived backward matrix.
///
/// Segment presence is always expressed as `&[bool]` slices indexed by
/// segment number, `true` meaning "fragment on hand".
#[derive(Debug, Clone)]
pub struct EccMap {
    name: &'static str,
    suppliers: usize,
    correctable: usize,
    parity_to_data: &'static [&'static [usize]],
    data_to_parity: Vec<Vec<usize>>,
    data_segments: usize,
    parity_segments: usize,
}

impl EccMap {
    /// Resolve a scheme by its registered name, e.g. `"ecc/4x4"`.
    pub fn by_name(name: &str) -> Result<Self> {
        let entry = SCHEMES
            .iter()
            .find(|(n, _, _, _)| *n == name)
            .ok_or_else(|| Error::UnknownEccScheme(name.to_string()))?;
        Ok(Self::from_entry(entry))
    }

    /// Resolve the scheme registered for a supplier count.
    pub fn for_suppliers(suppliers: usize) -> Result<Self> {
        let entry = SCHEMES
            .iter()
            .find(|(_, n, _, _)| *n == suppliers)
            .ok_or(Error::UnsupportedSupplierCount { suppliers })?;
        Ok(Self::from_entry(entry))
    }

    /// The scheme used when no explicit choice is available anywhere.
    pub fn default_scheme() -> Self {
        // first table entry is the DEFAULT_SUPPLIER_COUNT scheme
        Self::from_entry(&SCHEMES[0])
    }

    fn from_entry(entry: &(&'static str, usize, usize, &'static [&'static [usize]])) -> Self {
        let (name, suppliers, correctable, parity_to_data) = *entry;
        let data_segments = parity_to_data
            .iter()
            .flat_map(|row| row.iter())
            .max()
            .map(|m| m + 1)
            .unwrap_or(0);
        let parity_segments = parity_to_data.len();
        let mut data_to_parity = vec![Vec::new(); data_segments];
        for (parity_num, row) in parity_to_data.iter().enumerate() {
            for &data_num in row.iter() {
                data_to_parity[data_num].push(parity_num);
            }
        }
        Self {
            name,
            suppliers,
            correctable,
            parity_to_data,
            data_to_parity,
            data_segments,
            parity_segments,
        }
    }

    /// Registered scheme name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of suppliers this scheme spreads fragments across.
    pub fn num_suppliers(&self) -> usize {
        self.suppliers
    }

    /// Number of data segments per block.
    pub fn data_segments(&self) -> usize {
        self.data_segments
    }

    /// Number of parity segments per block.
    pub fn parity_segments(&self) -> usize {
        self.parity_segments
    }

    /// Guaranteed-fixable error count for this scheme.
    pub fn correctable_errors(&self) -> usize {
        self.correctable
    }

    /// How many intact data segments guarantee full recovery.
    pub fn data_needed(&self) -> usize {
        self.data_segments - self.correctable
    }

    /// Data segment numbers feeding parity segment `parity_num`.
    pub fn parity_inputs(&self, parity_num: usize) -> &[usize] {
        self.parity_to_data[parity_num]
    }

    /// Parity segment numbers that include data segment `data_num`.
    pub fn parities_using(&self, data_num: usize) -> &[usize] {
        &self.data_to_parity[data_num]
    }

    /// Whether iterative single-miss repair would recover every data segment.
    ///
    /// Walks the parities repeatedly: any present parity missing exactly one
    /// of its data inputs repairs that input; stops when a full pass makes no
    /// progress. True iff nothing is left missing.
    pub fn fixable(&self, data_present: &[bool], parity_present: &[bool]) -> bool {
        debug_assert_eq!(data_present.len(), self.data_segments);
        debug_assert_eq!(parity_present.len(), self.parity_segments);

        let mut data = data_present.to_vec();
        let mut still_missing = data.iter().filter(|p| !**p).count();

        let mut making_progress = true;
        while making_progress && still_missing > 0 {
            making_progress = false;
            for (parity_num, row) in self.parity_to_data.iter().enumerate() {
                if !parity_present[parity_num] {
                    continue;
                }
                let mut missing = 0;
                let mut last_missing = 0;
                for &data_num in row.iter() {
                    if !data[data_num] {
                        missing += 1;
                        last_missing = data_num;
                    }
                }
                if missing == 1 {
                    data[last_missing] = true;
                    still_missing -= 1;
                    making_progress = true;
                }
            }
        }
        still_missing == 0
    }

    /// Whether at least one repair step is available right now.
    ///
    /// A present parity missing exactly one data input can repair that input;
    /// a missing parity whose data inputs are all present can itself be
    /// rebuilt. Either counts as progress.
    pub fn can_make_progress(&self, data_present: &[bool], parity_present: &[bool]) -> bool {
        debug_assert_eq!(data_present.len(), self.data_segments);
        debug_assert_eq!(parity_present.len(), self.parity_segments);

        for (parity_num, row) in self.parity_to_data.iter().enumerate() {
            let missing = row.iter().filter(|&&d| !data_present[d]).count();
            if parity_present[parity_num] {
                if missing == 1 {
                    return true;
                }
            } else if missing == 0 {
                return true;
            }
        }
        false
    }

    /// Pick the parity to repair missing data segment `data_num` with.
    ///
    /// Only parities that are present, include `data_num`, and miss no other
    /// data input qualify; among those the one with the fewest inputs wins.
    /// Returns the parity number and its data-input row.
    pub fn data_fix_path(
        &self,
        data_present: &[bool],
        parity_present: &[bool],
        data_num: usize,
    ) -> Option<(usize, &'static [usize])> {
        if data_present[data_num] {
            return None;
        }
        let mut best: Option<(usize, &'static [usize])> = None;
        for (parity_num, row) in self.parity_to_data.iter().enumerate() {
            if !parity_present[parity_num] || !row.contains(&data_num) {
                continue;
            }
            let missing = row.iter().filter(|&&d| !data_present[d]).count();
            if missing != 1 {
                continue;
            }
            match best {
                Some((_, best_row)) if best_row.len() <= row.len() => {}
                _ => best = Some((parity_num, *row)),
            }
        }
        best
    }
}

impl std::fmt::Display for EccMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_name() {
        let map = EccMap::by_name("ecc/4x4").unwrap();
        assert_eq!(map.num_suppliers(), 4);
        assert_eq!(map.data_segments(), 4);
        assert_eq!(map.parity_segments(), 4);
        assert_eq!(map.correctable_errors(), 2);
    }

    #[test]
    fn test_resolve_unknown_name_fails() {
        assert!(EccMap::by_name("ecc/5x5").is_err());
    }

    #[test]
    fn test_resolve_by_supplier_count() {
        for &n in SUPPLIER_COUNTS {
            let map = EccMap::for_suppliers(n).unwrap();
            assert_eq!(map.num_suppliers(), n);
            assert_eq!(map.data_segments(), n);
            assert_eq!(map.parity_segments(), n);
        }
        assert!(EccMap::for_suppliers(5).is_err());
    }

    #[test]
    fn test_default_scheme_is_two_by_two() {
        assert_eq!(EccMap::default_scheme().name(), "ecc/2x2");
    }

    #[test]
    fn test_correctable_errors_table() {
        let expected = [(2, 1), (4, 2), (7, 3), (13, 4), (18, 5), (26, 6), (64, 10)];
        for (n, ce) in expected {
            assert_eq!(correctable_errors_for(n), Some(ce));
            assert_eq!(EccMap::for_suppliers(n).unwrap().correctable_errors(), ce);
        }
        assert_eq!(correctable_errors_for(3), None);
    }

    #[test]
    fn test_backward_matrix() {
        let map = EccMap::by_name("ecc/2x2").unwrap();
        assert_eq!(map.parities_using(0), &[1]);
        assert_eq!(map.parities_using(1), &[0]);

        let map = EccMap::by_name("ecc/4x4").unwrap();
        // data 0 feeds parities 1, 2, 3; data 2 feeds parities 0, 1
        assert_eq!(map.parities_using(0), &[1, 2, 3]);
        assert_eq!(map.parities_using(2), &[0, 1]);
    }

    #[test]
    fn test_fixable_nothing_missing() {
        let map = EccMap::by_name("ecc/4x4").unwrap();
        assert!(map.fixable(&[true; 4], &[false; 4]));
    }

    #[test]
    fn test_fixable_single_miss_via_parity() {
        let map = EccMap::by_name("ecc/2x2").unwrap();
        // data 0 missing, parity 1 = [0] present: repairable
        assert!(map.fixable(&[false, true], &[false, true]));
        // data 0 missing, only parity 0 = [1] present: stuck
        assert!(!map.fixable(&[false, true], &[true, false]));
    }

    #[test]
    fn test_fixable_iterative_chain() {
        let map = EccMap::by_name("ecc/4x4").unwrap();
        // data 1 and 2 missing; parity 1 = [0,2] repairs 2 first, after
        // which parity 0 = [1,2,3] repairs 1 on the next pass.
        let data = [true, false, false, true];
        let parity = [true, true, false, false];
        assert!(map.fixable(&data, &parity));
    }

    #[test]
    fn test_fixable_beyond_budget() {
        let map = EccMap::by_name("ecc/4x4").unwrap();
        // everything gone
        assert!(!map.fixable(&[false; 4], &[false; 4]));
        // three data segments missing with one parity cannot close the gap
        assert!(!map.fixable(&[true, false, false, false], &[true, false, false, false]));
    }

    #[test]
    fn test_can_make_progress() {
        let map = EccMap::by_name("ecc/4x4").unwrap();
        // nothing missing anywhere: no work to do
        assert!(!map.can_make_progress(&[true; 4], &[true; 4]));
        // a parity is missing and all its inputs are present: rebuildable
        assert!(map.can_make_progress(&[true; 4], &[true, true, true, false]));
        // one data segment missing with parity cover: work available
        assert!(map.can_make_progress(&[false, true, true, true], &[false, true, false, false]));
        // total loss: stuck
        assert!(!map.can_make_progress(&[false; 4], &[false; 4]));
    }

    #[test]
    fn test_data_fix_path_picks_smallest_parity() {
        let map = EccMap::by_name("ecc/4x4").unwrap();
        let data = [true, false, true, true];
        let parity = [true, true, true, false];
        // parities containing data 1: #0 = [1,2,3] (present), #3 = [0,1] (absent)
        let (parity_num, row) = map.data_fix_path(&data, &parity, 1).unwrap();
        assert_eq!(parity_num, 0);
        assert_eq!(row, &[1, 2, 3]);

        // with parity 3 present it wins on size
        let parity = [true, true, true, true];
        let (parity_num, row) = map.data_fix_path(&data, &parity, 1).unwrap();
        assert_eq!(parity_num, 3);
        assert_eq!(row, &[0, 1]);
    }

    #[test]
    fn test_data_fix_path_segment_already_present() {
        let map = EccMap::by_name("ecc/4x4").unwrap();
        assert!(map.data_fix_path(&[true; 4], &[true; 4], 2).is_none());
    }

    #[test]
    fn test_big_scheme_dimensions() {
        let map = EccMap::by_name("ecc/64x64").unwrap();
        assert_eq!(map.data_segments(), 64);
        assert_eq!(map.parity_segments(), 64);
        assert_eq!(map.data_needed(), 54);
        // every data segment is covered by at least one parity
        for d in 0..64 {
            assert!(!map.parities_using(d).is_empty());
        }
    }

    #[test]
    fn test_big_scheme_survives_correctable_losses() {
        for &n in SUPPLIER_COUNTS {
            let map = EccMap::for_suppliers(n).unwrap();
            let ce = map.correctable_errors();
            // lose the first `ce` suppliers entirely (their data AND parity)
            let mut data = vec![true; n];
            let mut parity = vec![true; n];
            for i in 0..ce {
                data[i] = false;
                parity[i] = false;
            }
            assert!(map.fixable(&data, &parity), "scheme {} must fix {} losses", map, ce);
        }
    }
}
