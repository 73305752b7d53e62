//! Per-slot minima summaries for the Pareto scan.
//!
//! The tree is generic over a [`MinimaPolicy`] that decides what aggregate
//! each inner slot caches about its subtree. [`ParetoMinima`] keeps the
//! lexicographically dominant two-field digest needed by
//! [`find_pareto_minima`](crate::BTree::find_pareto_minima); [`NoMinima`]
//! erases the field and turns all summary maintenance into no-ops.

use size_of::SizeOf;
use std::fmt::Debug;

/// Projection of a key to the two weight fields driving dominance pruning.
pub trait ParetoKey {
    type Weight: Copy + Ord + Debug + Send + Sync + SizeOf + 'static;

    fn first_weight(&self) -> Self::Weight;
    fn second_weight(&self) -> Self::Weight;
}

/// A two-field dominance digest: the projection of the key with the smallest
/// second weight in some key range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, SizeOf)]
pub struct MinKey<W> {
    pub first_weight: W,
    pub second_weight: W,
}

impl<W: Copy + Ord> MinKey<W> {
    pub fn new(first_weight: W, second_weight: W) -> Self {
        Self {
            first_weight,
            second_weight,
        }
    }

    pub fn of_key<K: ParetoKey<Weight = W>>(key: &K) -> Self {
        Self::new(key.first_weight(), key.second_weight())
    }

    /// Whether this digest improves on the running prefix minimum `current`:
    /// a strictly smaller second weight, or an exact tie on both fields.
    pub fn improves(&self, current: &Self) -> bool {
        self.second_weight < current.second_weight
            || (self.first_weight == current.first_weight
                && self.second_weight == current.second_weight)
    }
}

/// Decides the per-slot aggregate carried by inner nodes.
///
/// Implemented by [`NoMinima`] and [`ParetoMinima`]; the tree never inspects
/// summaries other than through this trait.
pub trait MinimaPolicy<K>: Send + Sync + Sized + 'static {
    type Summary: Clone + Debug + PartialEq + Send + Sync + SizeOf + 'static;

    /// Summary of a leaf's key run.
    fn of_leaf(keys: &[K]) -> Self::Summary;

    /// Summary of an inner node, folded over its slots' summaries.
    fn of_summaries<'a>(summaries: impl Iterator<Item = &'a Self::Summary>) -> Self::Summary;

    /// Whether `candidate` improves the running prefix minimum.
    fn improves(candidate: &Self::Summary, current: &Self::Summary) -> bool;
}

/// Disables minima tracking; the summary field is zero-sized and vanishes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, SizeOf)]
pub struct NoMinima;

impl<K> MinimaPolicy<K> for NoMinima {
    type Summary = NoMinima;

    fn of_leaf(_keys: &[K]) -> Self::Summary {
        NoMinima
    }

    fn of_summaries<'a>(_summaries: impl Iterator<Item = &'a Self::Summary>) -> Self::Summary {
        NoMinima
    }

    fn improves(_candidate: &Self::Summary, _current: &Self::Summary) -> bool {
        false
    }
}

/// Tracks the dominant [`MinKey`] digest of every subtree.
#[derive(Clone, Copy, Debug, SizeOf)]
pub struct ParetoMinima;

impl<K: ParetoKey + 'static> MinimaPolicy<K> for ParetoMinima {
    type Summary = MinKey<K::Weight>;

    fn of_leaf(keys: &[K]) -> Self::Summary {
        let min = keys
            .iter()
            .min_by_key(|key| key.second_weight())
            .expect("leaf nodes are never empty");
        MinKey::of_key(min)
    }

    fn of_summaries<'a>(summaries: impl Iterator<Item = &'a Self::Summary>) -> Self::Summary {
        *summaries
            .min_by_key(|summary| summary.second_weight)
            .expect("inner nodes are never empty")
    }

    fn improves(candidate: &Self::Summary, current: &Self::Summary) -> bool {
        candidate.improves(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn improvement_rule() {
        let running = MinKey::new(4u32, 10u32);
        // Strictly smaller second weight.
        assert!(MinKey::new(9, 7).improves(&running));
        // Exact tie on both fields is retained.
        assert!(MinKey::new(4, 10).improves(&running));
        // Second-weight tie with a different first weight is dominated.
        assert!(!MinKey::new(5, 10).improves(&running));
        assert!(!MinKey::new(0, 11).improves(&running));
    }
}
