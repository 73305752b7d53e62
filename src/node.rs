//! In-memory node records and their bookkeeping.
//!
//! Nodes form a strict ownership tree: every inner slot exclusively owns one
//! child. The leaf/inner distinction is a sum type whose discriminator
//! coincides with `level == 0`. Global leaf and inner-node counters are
//! atomic because rewrites allocate and free nodes from concurrent tasks.

use crate::minima::MinimaPolicy;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use size_of::SizeOf;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A leaf holding a sorted run of keys. Non-root leaves keep their length
/// within `[leafslotmin, leafslotmax]`.
#[derive(Clone, Debug, SizeOf)]
pub(crate) struct LeafNode<K> {
    pub keys: Vec<K>,
}

impl<K> LeafNode<K> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: Vec::with_capacity(capacity),
        }
    }
}

/// One slot of an inner node: the subtree's router (its maximum key), its
/// weight (key count), its cached minima summary, and the owned child.
#[derive(Debug, SizeOf)]
pub(crate) struct InnerSlot<K, M: MinimaPolicy<K>> {
    pub router: K,
    pub weight: usize,
    pub minimum: M::Summary,
    pub child: Node<K, M>,
}

#[derive(Debug, SizeOf)]
pub(crate) struct InnerNode<K, M: MinimaPolicy<K>> {
    /// Height of this node; children are at `level - 1`, leaves at 0.
    pub level: usize,
    pub slots: Vec<InnerSlot<K, M>>,
}

#[derive(Debug, SizeOf)]
pub(crate) enum Node<K, M: MinimaPolicy<K>> {
    Leaf(Box<LeafNode<K>>),
    Inner(Box<InnerNode<K, M>>),
}

impl<K, M: MinimaPolicy<K>> Node<K, M> {
    pub(crate) fn level(&self) -> usize {
        match self {
            Self::Leaf(_) => 0,
            Self::Inner(inner) => inner.level,
        }
    }
}

/// Frees a subtree, keeping the node counters in step. The only way nodes
/// leave the tree; a node is released exactly once, after its contents have
/// been streamed out or copied.
pub(crate) fn release_node<K, M: MinimaPolicy<K>>(node: Node<K, M>, counters: &NodeCounters) {
    match node {
        Node::Leaf(_) => counters.dec_leaf(),
        Node::Inner(inner) => {
            let InnerNode { slots, .. } = *inner;
            for slot in slots {
                release_node(slot.child, counters);
            }
            counters.dec_inner();
        }
    }
}

/// Live node counts, updated from whichever worker allocates or frees.
#[derive(Debug, Default)]
pub(crate) struct NodeCounters {
    leaves: AtomicUsize,
    innernodes: AtomicUsize,
}

impl NodeCounters {
    pub(crate) fn inc_leaf(&self) {
        self.leaves.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_leaves(&self, n: usize) {
        self.leaves.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn dec_leaf(&self) {
        self.leaves.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_inner(&self) {
        self.innernodes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_inner(&self) {
        self.innernodes.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn leaves(&self) -> usize {
        self.leaves.load(Ordering::Relaxed)
    }

    pub(crate) fn innernodes(&self) -> usize {
        self.innernodes.load(Ordering::Relaxed)
    }
}

/// Snapshot of the tree's node statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, SizeOf)]
pub struct TreeStats {
    /// Number of keys in the tree.
    pub itemcount: usize,
    /// Number of leaves.
    pub leaves: usize,
    /// Number of inner nodes.
    pub innernodes: usize,
}

impl TreeStats {
    /// Total number of nodes.
    pub fn nodes(&self) -> usize {
        self.leaves + self.innernodes
    }
}

/// Per-worker spare leaves used as the destination of the two-pointer merge
/// during in-place leaf updates. The merge writes into the spare, the slot
/// adopts it, and the displaced leaf becomes the worker's new spare.
///
/// Slots are keyed by the rayon worker index (the final slot catches calls
/// from outside the pool) and padded to keep workers off each other's cache
/// lines. Spares are not counted by the leaf counter.
pub(crate) struct SparePool<K> {
    slots: Box<[CachePadded<Mutex<Option<Box<LeafNode<K>>>>>]>,
}

impl<K> SparePool<K> {
    pub(crate) fn new() -> Self {
        let slots = (0..rayon::current_num_threads() + 1)
            .map(|_| CachePadded::new(Mutex::new(None)))
            .collect();
        Self { slots }
    }

    fn slot(&self) -> &Mutex<Option<Box<LeafNode<K>>>> {
        let last = self.slots.len() - 1;
        let index = rayon::current_thread_index().map_or(last, |i| i.min(last));
        &self.slots[index]
    }

    /// Takes this worker's spare, or allocates one on first use.
    pub(crate) fn acquire(&self, capacity: usize) -> Box<LeafNode<K>> {
        match self.slot().lock().take() {
            Some(mut leaf) => {
                leaf.keys.reserve(capacity);
                leaf
            }
            None => Box::new(LeafNode::with_capacity(capacity)),
        }
    }

    /// Hands a displaced leaf back as this worker's spare.
    pub(crate) fn release(&self, leaf: Box<LeafNode<K>>) {
        debug_assert!(leaf.keys.is_empty());
        let mut slot = self.slot().lock();
        if slot.is_none() {
            *slot = Some(leaf);
        }
    }
}
