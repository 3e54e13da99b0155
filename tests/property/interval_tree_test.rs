// tests/property/interval_tree_test.rs

//! The interval tree must agree with a naive scan model under arbitrary
//! insert/remove/stab sequences.

use clusterlib::core::interval_tree::IntervalTree;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Insert { lo: u64, hi: u64, value: u32 },
    Remove { index: usize },
    Stab { point: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..1000, 0u64..200, any::<u32>()).prop_map(|(lo, span, value)| Op::Insert {
            lo,
            hi: lo + span,
            value,
        }),
        (any::<prop::sample::Index>()).prop_map(|index| Op::Remove {
            index: index.index(64),
        }),
        (0u64..1300).prop_map(|point| Op::Stab { point }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    })]

    #[test]
    fn tree_matches_naive_model(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let mut tree: IntervalTree<u64, u32> = IntervalTree::new();
        let mut model: Vec<(u64, u64, u32)> = Vec::new();

        for op in ops {
            match op {
                Op::Insert { lo, hi, value } => {
                    tree.insert(lo, hi, value);
                    model.push((lo, hi, value));
                }
                Op::Remove { index } => {
                    if model.is_empty() {
                        continue;
                    }
                    let (lo, hi, value) = model[index % model.len()];
                    prop_assert!(tree.remove(&lo, &hi, &value));
                    let position = model
                        .iter()
                        .position(|e| *e == (lo, hi, value))
                        .expect("model holds the entry");
                    model.remove(position);
                }
                Op::Stab { point } => {
                    let mut hits: Vec<u32> = tree.stab(&point).into_iter().copied().collect();
                    let mut expected: Vec<u32> = model
                        .iter()
                        .filter(|(lo, hi, _)| *lo <= point && point <= *hi)
                        .map(|(_, _, v)| *v)
                        .collect();
                    hits.sort_unstable();
                    expected.sort_unstable();
                    prop_assert_eq!(hits, expected);
                }
            }
            prop_assert_eq!(tree.len(), model.len());
        }

        // Drain the survivors; the tree must empty out exactly.
        for (lo, hi, value) in model {
            prop_assert!(tree.remove(&lo, &hi, &value));
        }
        prop_assert!(tree.is_empty());
    }
}
