//! The fixed universe of psalms and the ordered pairs drawn from it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Number of psalms in the universe.
pub const UNIVERSE: usize = 150;

/// Ordered pairs excluding identity: 150 × 149.
pub const TOTAL_PAIRS: i64 = (UNIVERSE * (UNIVERSE - 1)) as i64;

/// An ordered pair of distinct psalms: the argument is that `y` follows `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pair {
    pub x: i32,
    pub y: i32,
}

impl Pair {
    /// Build a pair, rejecting out-of-range psalms and identity pairs.
    pub fn new(x: i32, y: i32) -> Option<Self> {
        if x == y || !in_universe(x) || !in_universe(y) {
            return None;
        }
        Some(Self { x, y })
    }

    /// Zero-based (row, column) offsets into a dense matrix.
    pub fn offsets(&self) -> (usize, usize) {
        ((self.x - 1) as usize, (self.y - 1) as usize)
    }

    pub fn reversed(&self) -> Self {
        Self { x: self.y, y: self.x }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.x, self.y)
    }
}

/// Whether `n` names a psalm.
pub fn in_universe(n: i32) -> bool {
    (1..=UNIVERSE as i32).contains(&n)
}

/// Every ordered pair in canonical work order: x ascending, then y ascending.
pub fn all_pairs() -> impl Iterator<Item = Pair> {
    (1..=UNIVERSE as i32)
        .flat_map(|x| (1..=UNIVERSE as i32).map(move |y| (x, y)))
        .filter_map(|(x, y)| Pair::new(x, y))
}

/// First `limit` pairs in canonical order that are not in `recorded`.
pub fn pending_from(recorded: &HashSet<Pair>, limit: usize) -> Vec<Pair> {
    all_pairs()
        .filter(|pair| !recorded.contains(pair))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_total_pairs() {
        assert_eq!(TOTAL_PAIRS, 22350);
        assert_eq!(all_pairs().count() as i64, TOTAL_PAIRS);
    }

    #[test]
    fn test_pair_validation() {
        assert!(Pair::new(1, 2).is_some());
        assert!(Pair::new(150, 149).is_some());
        assert!(Pair::new(3, 3).is_none());
        assert!(Pair::new(0, 5).is_none());
        assert!(Pair::new(5, 151).is_none());
    }

    #[test]
    fn test_pending_from_empty_ledger() {
        let pending = pending_from(&HashSet::new(), 5);
        let expected: Vec<Pair> = (2..=6).map(|y| Pair::new(1, y).unwrap()).collect();
        assert_eq!(pending, expected);
    }

    #[test]
    fn test_pending_crosses_row_boundary() {
        let recorded: HashSet<Pair> = (2..=150).map(|y| Pair::new(1, y).unwrap()).collect();
        let pending = pending_from(&recorded, 2);
        assert_eq!(pending, vec![Pair::new(2, 1).unwrap(), Pair::new(2, 3).unwrap()]);
    }

    #[test]
    fn test_pending_zero_limit() {
        assert!(pending_from(&HashSet::new(), 0).is_empty());
    }

    fn arb_recorded() -> impl Strategy<Value = HashSet<Pair>> {
        prop::collection::hash_set((1i32..=150, 1i32..=150), 0..400).prop_map(|raw| {
            raw.into_iter()
                .filter_map(|(x, y)| Pair::new(x, y))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_pending_is_ordered_and_unrecorded(recorded in arb_recorded(), limit in 0usize..600) {
            let pending = pending_from(&recorded, limit);
            prop_assert!(pending.len() <= limit);
            for pair in &pending {
                prop_assert_ne!(pair.x, pair.y);
                prop_assert!(!recorded.contains(pair));
            }
            for window in pending.windows(2) {
                prop_assert!((window[0].x, window[0].y) < (window[1].x, window[1].y));
            }
        }
    }
}
