//! Pareto-minima scan over the cached slot summaries.
//!
//! A recursive prefix-minimum scan: a subtree is visited only when its cached
//! summary improves the running minimum, and the minimum advances *after* the
//! recursion, because children are ordered by router while their summaries
//! are not monotone. Above the configured depth each surviving child becomes
//! its own task; below it the scan stays on one worker to keep cache lines
//! warm.

use super::BTree;
use crate::batch::Operation;
use crate::minima::{MinKey, ParetoKey, ParetoMinima};
use crate::node::Node;
use crate::Key;
use rayon::prelude::*;

impl<K> BTree<K, ParetoMinima>
where
    K: Key + ParetoKey,
{
    /// Collects every key not strictly dominated in the second weight, given
    /// the running prefix minimum `prefix_min`. Each minimum is emitted as a
    /// `DELETE`-tagged record, in in-order traversal order, ready to be fed
    /// back as a deletion batch.
    ///
    /// ```
    /// use wbtree::{BatchKind, MinKey, Operation, ParetoBTree, ParetoKey};
    ///
    /// #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
    /// struct Label(u32, u32);
    ///
    /// impl ParetoKey for Label {
    ///     type Weight = u32;
    ///     fn first_weight(&self) -> u32 { self.0 }
    ///     fn second_weight(&self) -> u32 { self.1 }
    /// }
    ///
    /// let mut queue = ParetoBTree::<Label>::new();
    /// let labels = [Label(1, 5), Label(2, 3), Label(3, 4), Label(4, 2)];
    /// let batch: Vec<_> = labels.iter().copied().map(Operation::insert).collect();
    /// queue.apply_updates(&batch, BatchKind::InsertsOnly);
    ///
    /// let mut minima = Vec::new();
    /// queue.find_pareto_minima(&MinKey::new(u32::MIN, u32::MAX), &mut minima);
    /// let front: Vec<_> = minima.iter().map(|op| op.key).collect();
    /// assert_eq!(front, [Label(1, 5), Label(2, 3), Label(4, 2)]);
    ///
    /// // The records delete the front from the queue.
    /// queue.apply_updates(&minima, BatchKind::DeletesOnly);
    /// assert_eq!(queue.size(), 1);
    /// ```
    pub fn find_pareto_minima(
        &self,
        prefix_min: &MinKey<K::Weight>,
        out: &mut Vec<Operation<K>>,
    ) {
        if let Some(root) = &self.root {
            scan(root, *prefix_min, self.params.pareto_seq_level(), out);
        }
    }
}

fn scan<K: Key + ParetoKey>(
    node: &Node<K, ParetoMinima>,
    prefix_min: MinKey<K::Weight>,
    seq_level: usize,
    out: &mut Vec<Operation<K>>,
) {
    let inner = match node {
        Node::Leaf(_) => {
            scan_sequential(node, prefix_min, out);
            return;
        }
        Node::Inner(inner) if inner.level < seq_level => {
            scan_sequential(node, prefix_min, out);
            return;
        }
        Node::Inner(inner) => inner,
    };

    let mut min = prefix_min;
    let mut tasks = Vec::new();
    for slot in &inner.slots {
        if slot.minimum.improves(&min) {
            tasks.push((&slot.child, min));
            min = slot.minimum;
        }
    }

    let results: Vec<Vec<Operation<K>>> = tasks
        .into_par_iter()
        .map(|(child, min)| {
            let mut local = Vec::new();
            scan(child, min, seq_level, &mut local);
            local
        })
        .collect();
    for minima in results {
        out.extend(minima);
    }
}

fn scan_sequential<K: Key + ParetoKey>(
    node: &Node<K, ParetoMinima>,
    mut min: MinKey<K::Weight>,
    out: &mut Vec<Operation<K>>,
) {
    match node {
        Node::Leaf(leaf) => {
            for key in &leaf.keys {
                let candidate = MinKey::of_key(key);
                if candidate.improves(&min) {
                    out.push(Operation::delete(key.clone()));
                    min = candidate;
                }
            }
        }
        Node::Inner(inner) => {
            for slot in &inner.slots {
                if slot.minimum.improves(&min) {
                    scan_sequential(&slot.child, min, out);
                    min = slot.minimum;
                }
            }
        }
    }
}
