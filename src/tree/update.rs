//! In-place update walk.
//!
//! The walk partitions the batch among a node's children by binary search on
//! the routers, recurses into touched children in parallel, and refreshes
//! routers, weights, and minima on the way back up. The moment any child's
//! projected weight leaves its permitted band, the node switches to the
//! rewrite walk instead.

use super::{BatchCtx, SlotMeta};
use crate::batch::{OpKind, UpdateDescriptor};
use crate::minima::MinimaPolicy;
use crate::node::{InnerNode, LeafNode, Node};
use crate::Key;
use rayon::prelude::*;
use std::mem;

impl<'a, K: Key> BatchCtx<'a, K> {
    /// Applies `upd` to the subtree under `node`, restructuring it if needed,
    /// and reports the refreshed router and minimum to the caller.
    pub(crate) fn update_node<M: MinimaPolicy<K>>(
        &self,
        node: &mut Node<K, M>,
        upd: UpdateDescriptor,
    ) -> SlotMeta<K, M::Summary> {
        match node {
            Node::Leaf(leaf) => self.update_leaf::<M>(leaf, upd),
            Node::Inner(inner) => {
                let (descs, rebalancing_needed) = self.partition(inner, &upd);

                if rebalancing_needed {
                    self.rebalance_inner(inner, descs);
                } else {
                    // The common case: all children stay inside their weight
                    // bands, so their disjoint sub-batches apply in parallel.
                    inner
                        .slots
                        .par_iter_mut()
                        .zip(descs.par_iter())
                        .for_each(|(slot, desc)| {
                            if desc.has_updates() {
                                let meta = self.update_node(&mut slot.child, *desc);
                                slot.router = meta.router;
                                slot.minimum = meta.minimum;
                                slot.weight = desc.weight;
                            }
                        });
                }

                let last = inner.slots.last().expect("inner nodes are never empty");
                SlotMeta {
                    router: last.router.clone(),
                    minimum: M::of_summaries(inner.slots.iter().map(|slot| &slot.minimum)),
                }
            }
        }
    }

    /// Two-pointer merge of a leaf with its update range, written into this
    /// worker's spare leaf. The slot adopts the merged leaf and the displaced
    /// one becomes the new spare.
    fn update_leaf<M: MinimaPolicy<K>>(
        &self,
        leaf: &mut Box<LeafNode<K>>,
        upd: UpdateDescriptor,
    ) -> SlotMeta<K, M::Summary> {
        let mut result = self.spares.acquire(self.params.leafslotmax());
        let mut read = 0;

        for op in &self.updates[upd.upd_begin..upd.upd_end] {
            match op.kind {
                OpKind::Delete => {
                    while leaf.keys[read] < op.key {
                        result.keys.push(leaf.keys[read].clone());
                        read += 1;
                    }
                    debug_assert!(
                        leaf.keys[read] == op.key,
                        "delete of a key that is not present"
                    );
                    read += 1;
                }
                OpKind::Insert => {
                    while read < leaf.keys.len() && leaf.keys[read] < op.key {
                        result.keys.push(leaf.keys[read].clone());
                        read += 1;
                    }
                    result.keys.push(op.key.clone());
                }
            }
        }
        result.keys.extend(leaf.keys[read..].iter().cloned());
        debug_assert_eq!(result.keys.len(), upd.weight);

        let meta = SlotMeta {
            router: result
                .keys
                .last()
                .expect("updated leaf is never empty")
                .clone(),
            minimum: M::of_leaf(&result.keys),
        };

        let mut displaced = mem::replace(leaf, result);
        displaced.keys.clear();
        self.spares.release(displaced);
        meta
    }

    /// Splits `upd`'s range into one contiguous sub-range per child and
    /// projects each child's post-batch weight. Returns the descriptors and
    /// whether any child left its permitted weight band.
    pub(crate) fn partition<M: MinimaPolicy<K>>(
        &self,
        inner: &InnerNode<K, M>,
        upd: &UpdateDescriptor,
    ) -> (Vec<UpdateDescriptor>, bool) {
        let min_weight = self.params.minweight(inner.level - 1);
        let max_weight = self.params.maxweight(inner.level - 1);

        let mut descs = Vec::with_capacity(inner.slots.len());
        let mut rebalancing_needed = false;
        let mut begin = upd.upd_begin;
        let last = inner.slots.len() - 1;

        for (i, slot) in inner.slots.iter().enumerate() {
            let end = if i == last {
                upd.upd_end
            } else {
                self.find_first_greater(begin, upd.upd_end, &slot.router)
            };
            let weight = (slot.weight as i64 + self.delta.range(begin, end)) as usize;
            let defective = weight < min_weight || weight > max_weight;
            rebalancing_needed |= defective;
            descs.push(UpdateDescriptor {
                upd_begin: begin,
                upd_end: end,
                weight,
                rebalancing_needed: defective,
            });
            begin = end;
        }

        (descs, rebalancing_needed)
    }

    /// First index in `[lo, hi)` whose update key is strictly greater than
    /// `key`; updates equal to a router stay with that router's subtree.
    fn find_first_greater(&self, mut lo: usize, mut hi: usize, key: &K) -> usize {
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if *key < self.updates[mid].key {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }
}
