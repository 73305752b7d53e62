//! Randomised batches against a reference sorted multiset.

use super::tests::{reference_minima, small_params, unbounded_min, Label};
use crate::{BTree, BatchKind, OpKind, Operation, ParetoBTree};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeMap;

type Model = BTreeMap<u64, usize>;

fn expand(model: &Model) -> Vec<u64> {
    let mut out = Vec::new();
    for (&key, &count) in model {
        out.extend(std::iter::repeat(key).take(count));
    }
    out
}

fn kind_rank(kind: OpKind) -> u8 {
    match kind {
        OpKind::Delete => 0,
        OpKind::Insert => 1,
    }
}

/// Turns a step of `(key, prefer_delete)` pairs into a valid sorted batch:
/// deletes are only emitted for keys still present, everything else inserts.
fn build_batch(model: &Model, step: &[(u64, bool)]) -> Vec<Operation<u64>> {
    let mut available = model.clone();
    let mut batch = Vec::with_capacity(step.len());
    for &(key, prefer_delete) in step {
        let remaining = available.get(&key).copied().unwrap_or(0);
        if prefer_delete && remaining > 0 {
            available.insert(key, remaining - 1);
            batch.push(Operation::delete(key));
        } else {
            batch.push(Operation::insert(key));
        }
    }
    batch.sort_by(|a, b| {
        a.key
            .cmp(&b.key)
            .then_with(|| kind_rank(a.kind).cmp(&kind_rank(b.kind)))
    });
    batch
}

fn apply_to_model(model: &mut Model, batch: &[Operation<u64>]) {
    for op in batch {
        match op.kind {
            OpKind::Insert => *model.entry(op.key).or_insert(0) += 1,
            OpKind::Delete => {
                let count = model.get_mut(&op.key).expect("delete of absent key");
                *count -= 1;
                if *count == 0 {
                    model.remove(&op.key);
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_batches_match_reference(
        steps in vec(vec((0u64..2000, any::<bool>()), 1..250), 1..10),
    ) {
        let mut tree = BTree::<u64>::with_params(small_params());
        let mut model = Model::new();

        for step in &steps {
            let batch = build_batch(&model, step);
            apply_to_model(&mut model, &batch);
            // Self-verification runs the deep invariant check after every batch.
            tree.apply_updates(&batch, BatchKind::Mixed);
            prop_assert_eq!(tree.collect_keys(), expand(&model));
        }
    }

    #[test]
    fn bulk_load_matches_sorted_input(mut keys in vec(0u64..100_000, 0..5000)) {
        keys.sort_unstable();
        let batch: Vec<_> = keys.iter().copied().map(Operation::insert).collect();

        let mut tree = BTree::<u64>::with_params(small_params());
        tree.apply_updates(&batch, BatchKind::InsertsOnly);

        prop_assert_eq!(tree.size(), keys.len());
        prop_assert_eq!(tree.collect_keys(), keys);
    }

    #[test]
    fn giant_mixed_batch_on_small_tree(
        resident in vec(0u64..500, 1..60),
        incoming in vec(500u64..100_000, 1000..4000),
    ) {
        // A batch much larger than the tree drives the chunked leaf rewrite,
        // including chunks that start on deletes and duplicate keys.
        let mut tree = BTree::<u64>::with_params(small_params());
        let mut model = Model::new();

        let mut resident = resident;
        resident.sort_unstable();
        let load: Vec<_> = resident.iter().copied().map(Operation::insert).collect();
        apply_to_model(&mut model, &load);
        tree.apply_updates(&load, BatchKind::InsertsOnly);

        let mut batch: Vec<_> = incoming.iter().copied().map(Operation::insert).collect();
        batch.extend(resident.iter().copied().map(Operation::delete));
        batch.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then_with(|| kind_rank(a.kind).cmp(&kind_rank(b.kind)))
        });
        apply_to_model(&mut model, &batch);
        tree.apply_updates(&batch, BatchKind::Mixed);

        prop_assert_eq!(tree.collect_keys(), expand(&model));
    }

    #[test]
    fn pareto_minima_match_reference(
        pairs in vec((0u32..1000, 0u32..1000), 1..400),
    ) {
        let mut keys: Vec<Label> = pairs
            .iter()
            .map(|&(first, second)| Label::new(first, second))
            .collect();
        keys.sort();

        let mut tree = ParetoBTree::<Label>::with_params(small_params());
        let batch: Vec<_> = keys.iter().copied().map(Operation::insert).collect();
        tree.apply_updates(&batch, BatchKind::InsertsOnly);

        let mut minima = Vec::new();
        tree.find_pareto_minima(&unbounded_min(), &mut minima);
        let found: Vec<Label> = minima.iter().map(|op| op.key).collect();
        let expected = reference_minima(&keys, unbounded_min());
        prop_assert_eq!(&found, &expected);

        // The emitted records form a valid deletion batch.
        tree.apply_updates(&minima, BatchKind::DeletesOnly);
        prop_assert_eq!(tree.size(), keys.len() - expected.len());
    }
}
