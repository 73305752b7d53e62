//! A weight-balanced B+ tree with parallel bulk batch updates.
//!
//! The tree stores an ordered multiset of keys. Instead of point mutations it
//! consumes *batches*: presorted sequences of insert/delete operations that
//! are applied atomically, with independent subtrees processed in parallel on
//! the [rayon] work-stealing pool. Subtrees whose post-batch weight leaves the
//! permitted band are rebuilt in bulk, streaming their keys through the
//! pending updates into a freshly allocated run of leaves.
//!
//! An optional per-slot aggregate (see [`ParetoMinima`]) caches the dominant
//! two-field summary of every subtree, which lets [`BTree::find_pareto_minima`]
//! prune entire subtrees while scanning for Pareto-optimal keys.
//!
//! ```
//! use wbtree::{BTree, BatchKind, Operation};
//!
//! let mut tree = BTree::<u64>::new();
//! let batch: Vec<_> = (0..1000).map(Operation::insert).collect();
//! tree.apply_updates(&batch, BatchKind::InsertsOnly);
//!
//! assert_eq!(tree.size(), 1000);
//! tree.verify();
//! ```

use std::fmt::Debug;

mod batch;
mod minima;
mod node;
mod params;
mod tree;

pub use batch::{BatchKind, OpKind, Operation};
pub use minima::{MinKey, MinimaPolicy, NoMinima, ParetoKey, ParetoMinima};
pub use node::TreeStats;
pub use params::TreeParams;
pub use tree::BTree;

/// A tree over keys carrying the two-field Pareto projection.
pub type ParetoBTree<K> = BTree<K, ParetoMinima>;

/// Trait bound for every key type stored in a [`BTree`].
///
/// The tree derives all key comparisons from the `Ord` instance; callers that
/// need a bespoke order wrap their keys in a newtype.
pub trait Key: Clone + Ord + Send + Sync + Debug + 'static {}

impl<T> Key for T where T: Clone + Ord + Send + Sync + Debug + 'static {}
