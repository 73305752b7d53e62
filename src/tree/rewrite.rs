//! Bulk rebuild of defective subtree runs.
//!
//! When a batch pushes subtrees outside their weight band, a contiguous run
//! of siblings is fused and rebuilt: a fresh array of target leaves is sized
//! and allocated up front, every source subtree streams through its updates
//! with each key written at its final rank, and a balanced subtree is then
//! assembled bottom-up over the filled leaves.
//!
//! The rank is the sole placement coordinate. Concurrent rewrite tasks cover
//! disjoint rank ranges, so they write disjoint slots of the shared target
//! array; the buffers are uninitialised cells written exactly once.

use super::BatchCtx;
use crate::batch::{OpKind, UpdateDescriptor};
use crate::minima::MinimaPolicy;
use crate::node::{release_node, InnerNode, InnerSlot, LeafNode, Node, NodeCounters};
use crate::params::TreeParams;
use crate::Key;
use log::trace;
use rayon::prelude::*;
use std::cell::UnsafeCell;
use std::mem::{self, ManuallyDrop, MaybeUninit};

/// Pre-allocated target leaf array of one rewrite.
///
/// Every leaf holds the designated number of keys except the last, which
/// absorbs the remainder (or a squeezed tail slightly above the designated
/// size, per `num_subtrees`).
pub(crate) struct TargetLeaves<K> {
    bufs: Vec<LeafBuf<K>>,
    designated: usize,
}

struct LeafBuf<K> {
    cells: Vec<UnsafeCell<MaybeUninit<K>>>,
}

// SAFETY: concurrent writers only ever touch disjoint cells (their rank
// ranges are disjoint), so sharing the buffer across tasks is sound.
unsafe impl<K: Send> Sync for LeafBuf<K> {}

impl<K> LeafBuf<K> {
    fn new(len: usize) -> Self {
        let mut cells = Vec::with_capacity(len);
        cells.resize_with(len, || UnsafeCell::new(MaybeUninit::uninit()));
        Self { cells }
    }

    /// # Safety
    ///
    /// Each index must be written exactly once across all tasks, and never
    /// concurrently with another write to the same index.
    unsafe fn write(&self, index: usize, key: K) {
        (*self.cells[index].get()).write(key);
    }

    fn into_keys(self) -> Vec<K> {
        // SAFETY: every cell was written exactly once by the rank-disjoint
        // writers, and `UnsafeCell<MaybeUninit<K>>` has the same layout as
        // `K`.
        let mut cells = ManuallyDrop::new(self.cells);
        let (ptr, len, cap) = (cells.as_mut_ptr(), cells.len(), cells.capacity());
        unsafe { Vec::from_raw_parts(ptr.cast::<K>(), len, cap) }
    }
}

impl<K: Key> TargetLeaves<K> {
    /// Sizes and allocates the leaf array for `n` keys before any worker
    /// touches it. Leaf initialisation is independent and runs in parallel.
    pub(crate) fn allocate(n: usize, params: &TreeParams, counters: &NodeCounters) -> Self {
        debug_assert!(n > 0);
        let designated = params.designated_leafsize();
        let leaf_count = params.num_subtrees(n, designated);
        let last = leaf_count - 1;

        let bufs: Vec<LeafBuf<K>> = (0..leaf_count)
            .into_par_iter()
            .map(|i| {
                let len = if i == last {
                    n - last * designated
                } else {
                    designated
                };
                LeafBuf::new(len)
            })
            .collect();
        counters.add_leaves(leaf_count);
        trace!("allocated {leaf_count} target leaves for {n} keys");

        Self { bufs, designated }
    }

    /// Converts the filled buffers into leaf nodes, in rank order.
    pub(crate) fn into_leaves(self) -> Vec<Option<Box<LeafNode<K>>>> {
        self.bufs
            .into_iter()
            .map(|buf| {
                Some(Box::new(LeafNode {
                    keys: buf.into_keys(),
                }))
            })
            .collect()
    }
}

/// Streams keys into the target array starting at a global rank, advancing
/// to the next leaf whenever the designated size is reached.
struct RankWriter<'a, K> {
    target: &'a TargetLeaves<K>,
    leaf_no: usize,
    out: usize,
}

impl<'a, K: Key> RankWriter<'a, K> {
    fn new(target: &'a TargetLeaves<K>, rank: usize) -> Self {
        let mut leaf_no = rank / target.designated;
        let out;
        if leaf_no >= target.bufs.len() {
            // Ranks past the designated grid are squeezed into the last leaf.
            leaf_no = target.bufs.len() - 1;
            out = rank - leaf_no * target.designated;
        } else {
            out = rank % target.designated;
        }
        Self {
            target,
            leaf_no,
            out,
        }
    }

    fn push(&mut self, key: K) {
        // SAFETY: this writer owns a rank range disjoint from every other
        // writer's, and visits each of its ranks once.
        unsafe {
            self.target.bufs[self.leaf_no].write(self.out, key);
        }
        self.out += 1;
        if self.out == self.target.designated && self.leaf_no + 1 < self.target.bufs.len() {
            self.leaf_no += 1;
            self.out = 0;
        }
    }
}

/// Work item of a rebalancing inner node: a child kept (and possibly updated
/// in place), or a defective run rebuilt from fresh leaves.
enum RunItem<K, M: MinimaPolicy<K>> {
    Keep {
        slot: InnerSlot<K, M>,
        desc: UpdateDescriptor,
    },
    Rebuild {
        members: Vec<(InnerSlot<K, M>, UpdateDescriptor)>,
        weight: usize,
    },
}

struct Segment {
    len: usize,
    weight: usize,
    run: bool,
}

impl<'a, K: Key> BatchCtx<'a, K> {
    /// Rewrites an inner node whose children include defective subtrees:
    /// fuses maximal runs, rebuilds each from a fresh leaf array, and keeps
    /// the rest, rebuilding the node's slot vector in place.
    pub(crate) fn rebalance_inner<M: MinimaPolicy<K>>(
        &self,
        inner: &mut InnerNode<K, M>,
        descs: Vec<UpdateDescriptor>,
    ) {
        let level = inner.level;
        let subtree_size = self.params.designated_subtreesize(level);
        trace!("rewrite session on level {level}");

        // Greedy left-to-right scan: a run opens at a defective child and
        // keeps absorbing neighbours while they are defective too, or while
        // the run's accumulated weight is still short of one designated
        // subtree.
        let mut segments = Vec::new();
        let mut i = 0;
        while i < descs.len() {
            let start = i;
            let mut weight = 0;
            let mut open = false;
            while i < descs.len()
                && (descs[i].rebalancing_needed || (open && weight != 0 && weight < subtree_size))
            {
                open = true;
                weight += descs[i].weight;
                i += 1;
            }
            if open {
                segments.push(Segment {
                    len: i - start,
                    weight,
                    run: true,
                });
            } else {
                segments.push(Segment {
                    len: 1,
                    weight: descs[i].weight,
                    run: false,
                });
                i += 1;
            }
        }

        // A run that closes at the node's right edge can still be under the
        // weight band; fold preceding siblings in until it is not.
        let min_weight = self.params.minweight(level - 1);
        if segments.last().map_or(false, |seg| seg.run && seg.weight > 0) {
            while segments.len() > 1 && segments[segments.len() - 1].weight < min_weight {
                let prev = segments.remove(segments.len() - 2);
                let last = segments.last_mut().expect("run segment present");
                last.len += prev.len;
                last.weight += prev.weight;
                last.run = true;
            }
        }

        let old_slots = mem::take(&mut inner.slots);
        let mut pairs = old_slots.into_iter().zip(descs);
        let mut items = Vec::with_capacity(segments.len());
        for segment in segments {
            if segment.run {
                let members: Vec<_> = pairs.by_ref().take(segment.len).collect();
                items.push(RunItem::Rebuild {
                    members,
                    weight: segment.weight,
                });
            } else {
                let (slot, desc) = pairs.next().expect("segment covers existing slots");
                items.push(RunItem::Keep { slot, desc });
            }
        }
        debug_assert!(pairs.next().is_none());

        let produced: Vec<Vec<InnerSlot<K, M>>> = items
            .into_par_iter()
            .map(|item| self.rebuild_item(level, item))
            .collect();
        inner.slots = produced.into_iter().flatten().collect();

        debug_assert!(!inner.slots.is_empty());
        debug_assert!(inner.slots.len() <= self.params.innerslotmax());
    }

    fn rebuild_item<M: MinimaPolicy<K>>(
        &self,
        level: usize,
        item: RunItem<K, M>,
    ) -> Vec<InnerSlot<K, M>> {
        match item {
            RunItem::Keep { mut slot, desc } => {
                if desc.has_updates() {
                    let meta = self.update_node(&mut slot.child, desc);
                    slot.router = meta.router;
                    slot.minimum = meta.minimum;
                }
                slot.weight = desc.weight;
                vec![slot]
            }
            RunItem::Rebuild { members, weight } => {
                if weight == 0 {
                    // The whole run is deleted by the batch.
                    for (slot, _) in members {
                        release_node(slot.child, self.counters);
                    }
                    return Vec::new();
                }

                let target = TargetLeaves::allocate(weight, self.params, self.counters);
                let mut jobs = Vec::with_capacity(members.len());
                let mut rank = 0;
                for (slot, desc) in members {
                    if desc.weight == 0 {
                        release_node(slot.child, self.counters);
                    } else {
                        jobs.push((slot.child, rank, desc));
                    }
                    rank += desc.weight;
                }
                jobs.into_par_iter()
                    .for_each(|(child, rank, desc)| self.rewrite(child, rank, desc, &target));

                let mut leaves = target.into_leaves();
                let slots = self.create_slots::<M>(level, weight, &mut leaves);
                debug_assert!(leaves.iter().all(Option::is_none));
                slots
            }
        }
    }

    /// Streams a source subtree through its updates into the target array,
    /// starting at the given global rank, then frees the source node.
    pub(crate) fn rewrite<M: MinimaPolicy<K>>(
        &self,
        node: Node<K, M>,
        rank: usize,
        upd: UpdateDescriptor,
        target: &TargetLeaves<K>,
    ) {
        match node {
            Node::Leaf(leaf) => {
                self.rewrite_leaf(&leaf, rank, &upd, target);
                self.counters.dec_leaf();
            }
            Node::Inner(inner) => {
                let (descs, _) = self.partition(&inner, &upd);
                let InnerNode { slots, .. } = *inner;

                let mut jobs = Vec::with_capacity(slots.len());
                let mut subtree_rank = rank;
                for (slot, desc) in slots.into_iter().zip(descs) {
                    if desc.weight == 0 {
                        release_node(slot.child, self.counters);
                    } else {
                        jobs.push((slot.child, subtree_rank, desc));
                    }
                    subtree_rank += desc.weight;
                }
                jobs.into_par_iter()
                    .for_each(|(child, rank, desc)| self.rewrite(child, rank, desc, target));
                self.counters.dec_inner();
            }
        }
    }

    fn rewrite_leaf(
        &self,
        leaf: &LeafNode<K>,
        rank: usize,
        upd: &UpdateDescriptor,
        target: &TargetLeaves<K>,
    ) {
        let span = upd.upd_end - upd.upd_begin;
        let delta = self.delta.range(upd.upd_begin, upd.upd_end);
        if span == 0 || delta < self.params.small_rewrite_limit() as i64 {
            self.rewrite_leaf_range(leaf, 0, rank, upd.upd_begin, upd.upd_end, true, target);
            return;
        }

        // A single leaf absorbing a large insert-heavy range: carve the range
        // into chunks, each placed independently at its corrected rank.
        let grain = self
            .params
            .designated_leafsize()
            .max(span / (rayon::current_num_threads() * 4).max(1));
        let starts: Vec<usize> = (upd.upd_begin..upd.upd_end).step_by(grain).collect();

        starts.into_par_iter().for_each(|chunk_begin| {
            let chunk_end = (chunk_begin + grain).min(upd.upd_end);
            let (read, chunk_rank) = if chunk_begin == upd.upd_begin {
                (0, rank)
            } else {
                // Keys consumed by the preceding chunks: every source key
                // below the previous update's key, plus one per delete of
                // that same key already processed.
                let prev = &self.updates[chunk_begin - 1].key;
                let mut read = leaf.keys.partition_point(|key| key < prev);
                let mut j = chunk_begin;
                while j > upd.upd_begin && self.updates[j - 1].key == *prev {
                    if self.updates[j - 1].kind == OpKind::Delete {
                        read += 1;
                    }
                    j -= 1;
                }
                let rank = rank as i64 + read as i64 + self.delta.range(upd.upd_begin, chunk_begin);
                (read, rank as usize)
            };
            self.rewrite_leaf_range(
                leaf,
                read,
                chunk_rank,
                chunk_begin,
                chunk_end,
                chunk_end == upd.upd_end,
                target,
            );
        });
    }

    /// Two-pointer merge of a leaf sub-range with an update sub-range,
    /// written at `rank`. The chunk covering the tail of the range also
    /// drains the remaining source keys.
    #[allow(clippy::too_many_arguments)]
    fn rewrite_leaf_range(
        &self,
        leaf: &LeafNode<K>,
        mut read: usize,
        rank: usize,
        upd_begin: usize,
        upd_end: usize,
        drain: bool,
        target: &TargetLeaves<K>,
    ) {
        let mut out = RankWriter::new(target, rank);

        for op in &self.updates[upd_begin..upd_end] {
            match op.kind {
                OpKind::Delete => {
                    while leaf.keys[read] < op.key {
                        out.push(leaf.keys[read].clone());
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
                        out.push(leaf.keys[read].clone());
                        read += 1;
                    }
                    out.push(op.key.clone());
                }
            }
        }
        if drain {
            while read < leaf.keys.len() {
                out.push(leaf.keys[read].clone());
                read += 1;
            }
        }
    }
}
