//! Deep invariant verification.

use super::BTree;
use crate::minima::MinimaPolicy;
use crate::node::Node;
use crate::Key;

#[derive(Default)]
struct VerifyStats {
    itemcount: usize,
    leaves: usize,
    innernodes: usize,
}

struct VerifyInfo<K, S> {
    min: K,
    max: K,
    summary: S,
    level: usize,
}

impl<K: Key, M: MinimaPolicy<K>> BTree<K, M> {
    /// Runs a thorough verification of all tree invariants, aborting on the
    /// first violation.
    pub fn verify(&self) {
        match &self.root {
            None => {
                assert_eq!(self.itemcount, 0);
                assert_eq!(self.counters.leaves(), 0);
                assert_eq!(self.counters.innernodes(), 0);
            }
            Some(root) => {
                let mut vstats = VerifyStats::default();
                self.verify_node(root, true, &mut vstats);

                assert_eq!(vstats.itemcount, self.itemcount, "item count drifted");
                assert_eq!(vstats.leaves, self.counters.leaves(), "leaf count drifted");
                assert_eq!(
                    vstats.innernodes,
                    self.counters.innernodes(),
                    "inner node count drifted"
                );

                let keys = self.collect_keys();
                assert_eq!(keys.len(), self.itemcount);
                assert!(
                    keys.windows(2).all(|pair| pair[0] <= pair[1]),
                    "in-order traversal is not sorted"
                );
            }
        }
    }

    fn verify_node(
        &self,
        node: &Node<K, M>,
        is_root: bool,
        vstats: &mut VerifyStats,
    ) -> VerifyInfo<K, M::Summary> {
        match node {
            Node::Leaf(leaf) => {
                assert!(!leaf.keys.is_empty());
                assert!(leaf.keys.windows(2).all(|pair| pair[0] <= pair[1]));
                assert!(is_root || leaf.keys.len() >= self.params.minweight(0));
                assert!(leaf.keys.len() <= self.params.maxweight(0));

                vstats.leaves += 1;
                vstats.itemcount += leaf.keys.len();
                VerifyInfo {
                    min: leaf.keys[0].clone(),
                    max: leaf.keys[leaf.keys.len() - 1].clone(),
                    summary: M::of_leaf(&leaf.keys),
                    level: 0,
                }
            }
            Node::Inner(inner) => {
                vstats.innernodes += 1;
                assert!(inner.level >= 1);
                assert!(!inner.slots.is_empty());
                assert!(inner.slots.len() <= self.params.innerslotmax());
                assert!(is_root || inner.slots.len() >= self.params.innerslotmin());
                assert!(inner
                    .slots
                    .windows(2)
                    .all(|pair| pair[0].router <= pair[1].router));

                let min_weight = self.params.minweight(inner.level - 1);
                let max_weight = self.params.maxweight(inner.level - 1);
                let mut first_min = None;
                let mut prev_router: Option<&K> = None;

                for slot in &inner.slots {
                    let before = vstats.itemcount;
                    let info = self.verify_node(&slot.child, false, vstats);

                    assert_eq!(info.level + 1, inner.level, "uneven leaf depth");
                    assert_eq!(
                        slot.weight,
                        vstats.itemcount - before,
                        "weight does not match subtree key count"
                    );
                    assert!(is_root || slot.weight >= min_weight);
                    assert!(slot.weight <= max_weight);
                    assert!(info.max == slot.router, "router is not the subtree maximum");
                    assert!(
                        slot.minimum == info.summary,
                        "cached minimum does not match subtree contents"
                    );
                    if let Some(prev) = prev_router {
                        assert!(info.min >= *prev);
                    }

                    if first_min.is_none() {
                        first_min = Some(info.min);
                    }
                    prev_router = Some(&slot.router);
                }

                VerifyInfo {
                    min: first_min.expect("inner nodes are never empty"),
                    max: inner.slots[inner.slots.len() - 1].router.clone(),
                    summary: M::of_summaries(inner.slots.iter().map(|slot| &slot.minimum)),
                    level: inner.level,
                }
            }
        }
    }

    /// In-order key sequence of the whole tree.
    pub(crate) fn collect_keys(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.itemcount);
        if let Some(root) = &self.root {
            collect_node(root, &mut out);
        }
        out
    }
}

fn collect_node<K: Key, M: MinimaPolicy<K>>(node: &Node<K, M>, out: &mut Vec<K>) {
    match node {
        Node::Leaf(leaf) => out.extend(leaf.keys.iter().cloned()),
        Node::Inner(inner) => {
            for slot in &inner.slots {
                collect_node(&slot.child, out);
            }
        }
    }
}
