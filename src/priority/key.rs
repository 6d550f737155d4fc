//! Priority key calculator: path vector + sort value + submission time,
//! combined into one total order where "smaller is higher priority".

use serde::{Deserialize, Serialize};

/// Fixed tree-depth limit; also the fixed width of [`PathVector`].
pub const MAX_DEPTH: usize = 10;

/// Sentinel branch index used to pad unused trailing slots.
const UNUSED_SLOT: u16 = 0;

/// Sentinel value for "no match — lowest priority" at every slot.
const SENTINEL: u16 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Fixed-width lexicographic comparison key: slot `i` holds the 1-based
/// branch index chosen at tree depth `i`; unused trailing slots are `0`.
/// `PathVector::unmatched()` is the all-`999` sentinel, strictly greater
/// than every non-sentinel vector since real branch indices never reach
/// 999 at realistic fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathVector([u16; MAX_DEPTH]);

impl PathVector {
    pub fn unmatched() -> Self {
        Self([SENTINEL; MAX_DEPTH])
    }

    /// Build a vector from the 1-based branch indices chosen at each depth,
    /// root first. Panics if `indices.len() > MAX_DEPTH` — callers must
    /// enforce the depth limit before calling (the tree loader does, at
    /// construction time).
    pub fn from_indices(indices: &[usize]) -> Self {
        assert!(
            indices.len() <= MAX_DEPTH,
            "path vector depth {} exceeds MAX_DEPTH {MAX_DEPTH}",
            indices.len()
        );
        let mut slots = [UNUSED_SLOT; MAX_DEPTH];
        for (i, &idx) in indices.iter().enumerate() {
            slots[i] = idx as u16;
        }
        Self(slots)
    }

    pub fn is_unmatched(&self) -> bool {
        self.0 == [SENTINEL; MAX_DEPTH]
    }

    pub fn slots(&self) -> &[u16; MAX_DEPTH] {
        &self.0
    }
}

/// Total order over `(path_vector, sort_value, submitted_at)`. `sort_value`
/// has already absorbed sort direction (DESC stored as negated), so smaller
/// is always higher priority across the whole tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PriorityKey {
    pub path: PathVector,
    pub sort_value: i64,
    pub submitted_at: i64,
}

impl PriorityKey {
    pub fn new(path: PathVector, sort_value: i64, submitted_at: i64) -> Self {
        Self {
            path,
            sort_value,
            submitted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicographic_order_prefers_earlier_differing_index() {
        let a = PathVector::from_indices(&[1, 1]);
        let b = PathVector::from_indices(&[1, 2]);
        assert!(a < b);

        let c = PathVector::from_indices(&[2]);
        assert!(b < c);
    }

    #[test]
    fn unmatched_is_strictly_greater_than_any_real_path() {
        let matched = PathVector::from_indices(&[9, 9, 9]);
        assert!(matched < PathVector::unmatched());
    }

    #[test]
    fn priority_key_breaks_ties_by_submission_time() {
        let path = PathVector::from_indices(&[1]);
        let older = PriorityKey::new(path, 0, 100);
        let newer = PriorityKey::new(path, 0, 200);
        assert!(older < newer);
    }

    #[test]
    fn desc_direction_is_encoded_as_negated_sort_value() {
        // priority=95 DESC should sort before priority=50 DESC
        let path = PathVector::from_indices(&[1]);
        let high = PriorityKey::new(path, -95, 0);
        let low = PriorityKey::new(path, -50, 0);
        assert!(high < low);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// `PathVector`'s derived `Ord` must agree with plain slot-wise
        /// comparison for any pair of paths, not just the hand-picked cases
        /// above.
        #[test]
        fn ordering_matches_slotwise_comparison(
            a in prop::collection::vec(1usize..900, 1..MAX_DEPTH),
            b in prop::collection::vec(1usize..900, 1..MAX_DEPTH),
        ) {
            let pa = PathVector::from_indices(&a);
            let pb = PathVector::from_indices(&b);
            prop_assert_eq!(pa.cmp(&pb), pa.slots().cmp(pb.slots()));
        }

        #[test]
        fn unmatched_never_beats_a_real_path(
            indices in prop::collection::vec(1usize..900, 0..MAX_DEPTH),
        ) {
            let matched = PathVector::from_indices(&indices);
            prop_assert!(matched <= PathVector::unmatched());
        }
    }
}
