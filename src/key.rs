//! The work-unit sort key.
//!
//! Lists are sorted ascending by this key and scanned from the end, so the
//! greatest key runs first. Greater means: more transitive dependents, then a
//! longer measured runtime, then the later registration slot. Running the
//! unit with the most descendants first, longest-first among ties, keeps
//! idle threads supplied with ready successors and shortens the critical
//! path.

use core::cmp::Ordering;

use crate::unit::UnitId;

/// Immutable sorting metadata for one work unit.
///
/// Keys are refreshed from live dependent counts and rolling averages by the
/// sort passes; between sorts they are snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkUnitKey {
    /// Transitive count of units that cannot start until this one finishes.
    pub dependents: usize,
    /// Rolling-average execution time in microseconds.
    pub average_micros: u64,
    /// The unit this key sorts; unique, so the order is total.
    pub unit: UnitId,
}

impl WorkUnitKey {
    /// Builds a key from its parts.
    #[must_use]
    pub fn new(dependents: usize, average_micros: u64, unit: UnitId) -> Self {
        Self {
            dependents,
            average_micros,
            unit,
        }
    }
}

impl Ord for WorkUnitKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dependents
            .cmp(&other.dependents)
            .then_with(|| self.average_micros.cmp(&other.average_micros))
            .then_with(|| self.unit.cmp(&other.unit))
    }
}

impl PartialOrd for WorkUnitKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(dependents: usize, average: u64, slot: u32) -> WorkUnitKey {
        WorkUnitKey::new(dependents, average, UnitId::new_for_test(slot, 0))
    }

    #[test]
    fn dependent_count_dominates() {
        assert!(key(5, 600, 0) < key(10, 500, 0));
    }

    #[test]
    fn runtime_breaks_dependent_ties() {
        assert!(key(5, 500, 0) < key(5, 600, 0));
    }

    #[test]
    fn identity_breaks_runtime_ties() {
        assert!(key(3, 500, 0) < key(3, 500, 1));
    }

    #[test]
    fn canonical_ladder_is_strict() {
        let first = key(10, 500, 0);
        let second = key(5, 600, 0);
        let third = key(5, 500, 0);
        let fourth = key(3, 500, 1);
        let fifth = key(3, 500, 0);

        assert!(fifth < fourth);
        assert!(fourth < third);
        assert!(third < second);
        assert!(second < first);

        assert!(!(first < second));
        assert!(!(second < third));
        assert!(!(third < fourth));
        assert!(!(fourth < fifth));
    }

    fn arb_key() -> impl Strategy<Value = WorkUnitKey> {
        (0usize..100, 0u64..10_000, 0u32..64, 0u32..4)
            .prop_map(|(dependents, average, slot, generation)| {
                WorkUnitKey::new(dependents, average, UnitId::new_for_test(slot, generation))
            })
    }

    proptest! {
        /// The ordering is a strict total order: irreflexive, antisymmetric,
        /// transitive, and total.
        #[test]
        fn ordering_is_a_strict_total_order(
            a in arb_key(),
            b in arb_key(),
            c in arb_key(),
        ) {
            prop_assert!(!(a < a));
            if a < b {
                prop_assert!(!(b < a));
            }
            if a < b && b < c {
                prop_assert!(a < c);
            }
            prop_assert!(a < b || b < a || a == b);
        }

        /// Sorting a shuffled list of keys is idempotent.
        #[test]
        fn sorting_is_idempotent(mut keys in proptest::collection::vec(arb_key(), 0..32)) {
            keys.sort();
            let once = keys.clone();
            keys.sort();
            prop_assert_eq!(once, keys);
        }
    }
}
