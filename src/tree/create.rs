//! Bottom-up construction over a filled target leaf array.
//!
//! Because designated subtree sizes are multiples of the designated leaf
//! size, every subtree's rank range maps to a contiguous, disjoint run of
//! target leaves; children are therefore built in parallel over split
//! sub-slices of the leaf array.

use super::BatchCtx;
use crate::minima::MinimaPolicy;
use crate::node::{InnerNode, InnerSlot, LeafNode, Node};
use crate::Key;
use rayon::prelude::*;
use std::mem;

impl<'a, K: Key> BatchCtx<'a, K> {
    /// Builds a balanced subtree of height `level` holding the `n` keys of
    /// `leaves`, returning its fully described slot.
    pub(crate) fn create_slot<M: MinimaPolicy<K>>(
        &self,
        level: usize,
        n: usize,
        leaves: &mut [Option<Box<LeafNode<K>>>],
    ) -> InnerSlot<K, M> {
        debug_assert!(n > 0);
        if level == 0 {
            debug_assert_eq!(leaves.len(), 1);
            let leaf = leaves[0].take().expect("target leaf grafted twice");
            debug_assert_eq!(leaf.keys.len(), n);
            InnerSlot {
                router: leaf.keys.last().expect("target leaf is filled").clone(),
                weight: n,
                minimum: M::of_leaf(&leaf.keys),
                child: Node::Leaf(leaf),
            }
        } else {
            let slots = self.create_slots::<M>(level, n, leaves);
            let router = slots.last().expect("subtree is never empty").router.clone();
            let minimum = M::of_summaries(slots.iter().map(|slot| &slot.minimum));
            self.counters.inc_inner();
            InnerSlot {
                router,
                weight: n,
                minimum,
                child: Node::Inner(Box::new(InnerNode { level, slots })),
            }
        }
    }

    /// Builds the slot vector of an inner node at `level` covering `n` keys:
    /// all children take the designated subtree size except the last, which
    /// absorbs the remainder.
    pub(crate) fn create_slots<M: MinimaPolicy<K>>(
        &self,
        level: usize,
        n: usize,
        leaves: &mut [Option<Box<LeafNode<K>>>],
    ) -> Vec<InnerSlot<K, M>> {
        let leafsize = self.params.designated_leafsize();
        let subtree_size = self.params.designated_subtreesize(level);
        let subtrees = self.params.num_subtrees(n, subtree_size);
        debug_assert!(subtrees <= self.params.innerslotmax());

        let mut weights = Vec::with_capacity(subtrees);
        let mut assigned = 0;
        for i in 0..subtrees {
            let weight = if i + 1 < subtrees {
                subtree_size
            } else {
                n - assigned
            };
            weights.push(weight);
            assigned += weight;
        }

        // Subtree boundaries land on leaf boundaries, so each child owns a
        // disjoint sub-slice of the target array.
        let mut parts = Vec::with_capacity(subtrees);
        let mut rest = leaves;
        for (i, weight) in weights.iter().enumerate() {
            if i + 1 < subtrees {
                let (part, tail) = mem::take(&mut rest).split_at_mut(weight / leafsize);
                parts.push(part);
                rest = tail;
            } else {
                parts.push(mem::take(&mut rest));
            }
        }

        weights
            .into_par_iter()
            .zip(parts)
            .map(|(weight, part)| self.create_slot::<M>(level - 1, weight, part))
            .collect()
    }
}
