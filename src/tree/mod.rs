//! The tree object and per-batch root dispatch.

use crate::batch::{compute_weightdelta, BatchKind, Operation, UpdateDescriptor, WeightDeltaView};
use crate::minima::{MinimaPolicy, NoMinima};
use crate::node::{release_node, LeafNode, Node, NodeCounters, SparePool, TreeStats};
use crate::params::TreeParams;
use crate::Key;
use log::{debug, trace};
use std::fmt;

mod create;
mod pareto;
mod rewrite;
mod update;
mod verify;

#[cfg(test)]
mod proptests;

use rewrite::TargetLeaves;

/// A weight-balanced B+ tree over an ordered multiset of keys, mutated
/// exclusively through presorted update batches.
///
/// `M` selects the per-slot minima aggregate; the default [`NoMinima`] keeps
/// the tree free of summary overhead, while
/// [`ParetoMinima`](crate::ParetoMinima) enables
/// [`find_pareto_minima`](Self::find_pareto_minima).
pub struct BTree<K, M: MinimaPolicy<K> = NoMinima> {
    root: Option<Node<K, M>>,
    itemcount: usize,
    params: TreeParams,
    counters: NodeCounters,
    spares: SparePool<K>,
    /// Reused across batches; sized to the current batch when it is mixed.
    weightdelta: Vec<i64>,
}

/// Router and minimum of a freshly updated subtree, reported to the parent.
pub(crate) struct SlotMeta<K, S> {
    pub router: K,
    pub minimum: S,
}

/// Borrowed state shared by every task of one batch.
pub(crate) struct BatchCtx<'a, K> {
    pub updates: &'a [Operation<K>],
    pub delta: WeightDeltaView<'a>,
    pub params: &'a TreeParams,
    pub counters: &'a NodeCounters,
    pub spares: &'a SparePool<K>,
}

impl<K: Key, M: MinimaPolicy<K>> BTree<K, M> {
    /// An empty tree with default parameters.
    pub fn new() -> Self {
        Self::with_params(TreeParams::default())
    }

    /// An empty tree with the given shape parameters.
    pub fn with_params(params: TreeParams) -> Self {
        Self {
            root: None,
            itemcount: 0,
            params,
            counters: NodeCounters::default(),
            spares: SparePool::new(),
            weightdelta: Vec::new(),
        }
    }

    /// Number of keys in the tree.
    pub fn size(&self) -> usize {
        self.itemcount
    }

    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    /// Height of the tree; 0 for an empty tree or a single leaf.
    pub fn height(&self) -> usize {
        self.root.as_ref().map_or(0, Node::level)
    }

    pub fn get_stats(&self) -> TreeStats {
        TreeStats {
            itemcount: self.itemcount,
            leaves: self.counters.leaves(),
            innernodes: self.counters.innernodes(),
        }
    }

    /// Average fill of the tree's leaves, relative to their capacity.
    pub fn avgfill_leaves(&self) -> f64 {
        let leaves = self.counters.leaves();
        if leaves == 0 {
            return 0.0;
        }
        self.itemcount as f64 / (leaves * self.params.leafslotmax()) as f64
    }

    /// Frees all nodes; the tree becomes empty.
    pub fn clear(&mut self) {
        if let Some(root) = self.root.take() {
            release_node(root, &self.counters);
        }
        self.itemcount = 0;
        debug_assert_eq!(self.counters.leaves(), 0);
        debug_assert_eq!(self.counters.innernodes(), 0);
    }

    /// Applies a presorted batch of updates atomically.
    ///
    /// Preconditions (checked only in self-verification mode): the batch is
    /// sorted ascending by key, `kind` matches its composition, and every
    /// delete targets a key present at apply time.
    ///
    /// ```
    /// use wbtree::{BTree, BatchKind, Operation};
    ///
    /// let mut tree = BTree::<u64>::new();
    /// let inserts: Vec<_> = (0..100).map(Operation::insert).collect();
    /// tree.apply_updates(&inserts, BatchKind::InsertsOnly);
    ///
    /// let mixed = vec![Operation::delete(3), Operation::insert(250)];
    /// tree.apply_updates(&mixed, BatchKind::Mixed);
    /// assert_eq!(tree.size(), 100);
    /// ```
    pub fn apply_updates(&mut self, updates: &[Operation<K>], kind: BatchKind) {
        if self.params.self_verify() {
            assert!(
                updates.windows(2).all(|pair| pair[0].key <= pair[1].key),
                "update batch is not sorted"
            );
        }

        let delta = match kind {
            BatchKind::InsertsOnly => WeightDeltaView::Uniform(1),
            BatchKind::DeletesOnly => WeightDeltaView::Uniform(-1),
            BatchKind::Mixed => {
                compute_weightdelta(updates, &mut self.weightdelta);
                WeightDeltaView::Table(&self.weightdelta)
            }
        };

        let new_size = self.itemcount as i64 + delta.range(0, updates.len());
        debug_assert!(new_size >= 0, "batch deletes more keys than present");
        let new_size = new_size as usize;
        trace!(
            "applying {} updates ({kind:?}): {} -> {new_size} keys",
            updates.len(),
            self.itemcount
        );
        self.itemcount = new_size;

        if new_size == 0 {
            self.clear();
            return;
        }
        if self.root.is_none() {
            self.root = Some(Node::Leaf(Box::new(LeafNode::with_capacity(
                self.params.leafslotmax(),
            ))));
            self.counters.inc_leaf();
        }

        let level = self.params.num_optimal_levels(new_size);
        let root_level = self.root.as_ref().expect("root exists").level();
        let rebuild_needed = (level < root_level && new_size < self.params.minweight(root_level))
            || new_size > self.params.maxweight(root_level);

        let ctx = BatchCtx {
            updates,
            delta,
            params: &self.params,
            counters: &self.counters,
            spares: &self.spares,
        };
        let upd = UpdateDescriptor {
            upd_begin: 0,
            upd_end: updates.len(),
            weight: new_size,
            rebalancing_needed: rebuild_needed,
        };

        if rebuild_needed {
            debug!("root rebuild: level {root_level} -> {level}, {new_size} keys");
            let target = TargetLeaves::allocate(new_size, &self.params, &self.counters);
            let old_root = self.root.take().expect("root exists");
            ctx.rewrite(old_root, 0, upd, &target);

            let mut leaves = target.into_leaves();
            let slot = ctx.create_slot::<M>(level, new_size, &mut leaves);
            debug_assert!(leaves.iter().all(Option::is_none));
            self.root = Some(slot.child);
        } else {
            let root = self.root.as_mut().expect("root exists");
            let _ = ctx.update_node(root, upd);
        }

        if self.params.self_verify() {
            self.verify();
        }
    }
}

impl<K: Key, M: MinimaPolicy<K>> Default for BTree<K, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, M: MinimaPolicy<K>> Drop for BTree<K, M> {
    fn drop(&mut self) {
        if let Some(root) = self.root.take() {
            release_node(root, &self.counters);
        }
    }
}

impl<K: Key, M: MinimaPolicy<K>> fmt::Debug for BTree<K, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "BTree {{ size: {}, height: {}, leaves: {}, innernodes: {} }}",
            self.itemcount,
            self.height(),
            self.counters.leaves(),
            self.counters.innernodes()
        )?;
        if f.alternate() {
            if let Some(root) = &self.root {
                fmt_node(f, root, 1)?;
            }
        }
        Ok(())
    }
}

fn fmt_node<K: Key, M: MinimaPolicy<K>>(
    f: &mut fmt::Formatter<'_>,
    node: &Node<K, M>,
    depth: usize,
) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match node {
        Node::Leaf(leaf) => writeln!(f, "{pad}leaf {:?}", leaf.keys),
        Node::Inner(inner) => {
            for slot in &inner.slots {
                writeln!(
                    f,
                    "{pad}slot router={:?} weight={} level={}",
                    slot.router, slot.weight, inner.level
                )?;
                fmt_node(f, &slot.child, depth + 1)?;
            }
            Ok(())
        }
    }
}
