//! Update batches and their weight-delta analysis.
//!
//! A batch is a presorted sequence of [`Operation`]s applied atomically. The
//! only per-batch precomputation is an exclusive prefix sum over the `±1`
//! weight contributions, so that the net key-count change of any update range
//! is a constant-time lookup during the tree walk. Homogeneous batches skip
//! the materialisation entirely.

use rayon::prelude::*;
use size_of::SizeOf;

/// Tag of a single update operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, SizeOf)]
pub enum OpKind {
    Insert,
    Delete,
}

/// One element of an update batch.
///
/// Batches must be sorted ascending by key, and every `Delete` must target a
/// key present in the tree at apply time. Neither precondition is checked
/// outside of self-verification mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, SizeOf)]
pub struct Operation<K> {
    pub kind: OpKind,
    pub key: K,
}

impl<K> Operation<K> {
    pub fn insert(key: K) -> Self {
        Self {
            kind: OpKind::Insert,
            key,
        }
    }

    pub fn delete(key: K) -> Self {
        Self {
            kind: OpKind::Delete,
            key,
        }
    }

    fn weight(&self) -> i64 {
        match self.kind {
            OpKind::Insert => 1,
            OpKind::Delete => -1,
        }
    }
}

/// Advertised composition of a batch.
///
/// Homogeneous batches let the tree resolve any range's weight delta as
/// `len · sign` without materialising the prefix-sum table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchKind {
    InsertsOnly,
    DeletesOnly,
    Mixed,
}

/// Constant-time view of the weight delta of any update sub-range.
#[derive(Clone, Copy, Debug)]
pub(crate) enum WeightDeltaView<'a> {
    Uniform(i64),
    /// Exclusive prefix sums; `table[end] - table[begin]` is the net change
    /// realised by updates `[begin, end)`.
    Table(&'a [i64]),
}

impl WeightDeltaView<'_> {
    pub(crate) fn range(&self, begin: usize, end: usize) -> i64 {
        match self {
            Self::Uniform(sign) => (end - begin) as i64 * sign,
            Self::Table(table) => table[end] - table[begin],
        }
    }
}

/// Descriptor of the update sub-range routed to one subtree, together with
/// the subtree's projected post-batch weight.
#[derive(Clone, Copy, Debug)]
pub(crate) struct UpdateDescriptor {
    pub upd_begin: usize,
    pub upd_end: usize,
    pub weight: usize,
    pub rebalancing_needed: bool,
}

impl UpdateDescriptor {
    pub(crate) fn has_updates(&self) -> bool {
        self.upd_begin != self.upd_end
    }
}

/// Fills `out` with the exclusive prefix sums of the batch's `±1` weight
/// contributions, `out.len() == updates.len() + 1`.
///
/// Two chunked passes over the batch: per-chunk sums reduced in parallel,
/// then a parallel fill seeded with each chunk's running base.
pub(crate) fn compute_weightdelta<K: Send + Sync>(updates: &[Operation<K>], out: &mut Vec<i64>) {
    out.clear();
    out.resize(updates.len() + 1, 0);
    if updates.is_empty() {
        return;
    }

    let chunk = (updates.len() / (rayon::current_num_threads() * 4).max(1)).max(4096);

    let sums: Vec<i64> = updates
        .par_chunks(chunk)
        .map(|ops| ops.iter().map(Operation::weight).sum())
        .collect();

    let mut bases = Vec::with_capacity(sums.len());
    let mut acc = 0;
    for sum in sums {
        bases.push(acc);
        acc += sum;
    }

    out[1..]
        .par_chunks_mut(chunk)
        .zip(updates.par_chunks(chunk))
        .zip(bases.par_iter())
        .for_each(|((out, ops), &base)| {
            let mut running = base;
            for (slot, op) in out.iter_mut().zip(ops) {
                running += op.weight();
                *slot = running;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed_batch(n: u64) -> Vec<Operation<u64>> {
        (0..n)
            .map(|i| {
                if i % 3 == 0 {
                    Operation::delete(i)
                } else {
                    Operation::insert(i)
                }
            })
            .collect()
    }

    #[test]
    fn prefix_sums_match_sequential() {
        for n in [0, 1, 5, 4095, 4096, 4097, 20_000] {
            let batch = mixed_batch(n);
            let mut table = Vec::new();
            compute_weightdelta(&batch, &mut table);

            assert_eq!(table.len(), batch.len() + 1);
            let mut acc = 0;
            assert_eq!(table[0], 0);
            for (i, op) in batch.iter().enumerate() {
                acc += op.weight();
                assert_eq!(table[i + 1], acc, "n={n} i={i}");
            }
        }
    }

    #[test]
    fn range_deltas() {
        let batch = mixed_batch(1000);
        let mut table = Vec::new();
        compute_weightdelta(&batch, &mut table);
        let view = WeightDeltaView::Table(&table);

        for (begin, end) in [(0, 0), (0, 1000), (17, 511), (999, 1000)] {
            let expected: i64 = batch[begin..end].iter().map(Operation::weight).sum();
            assert_eq!(view.range(begin, end), expected);
        }

        let uniform = WeightDeltaView::Uniform(-1);
        assert_eq!(uniform.range(10, 25), -15);
    }
}
