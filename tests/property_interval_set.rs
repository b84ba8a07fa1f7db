//! Property-based tests for the interval set and the block allocator
//!
//! Uses proptest to check the set against a plain `BTreeSet` model across
//! random insert/remove sequences.

use proptest::prelude::*;
use std::collections::BTreeSet;
use vaultpack::core::allocator::extent::IntervalSet;
use vaultpack::core::allocator::BlockAllocator;
use vaultpack::core::inventory::Inventory;

#[derive(Debug, Clone)]
enum Op {
    Add(u64, u64),
    Remove(u64),
    RemoveRange(u64, u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..200, 0u64..20).prop_map(|(start, len)| Op::Add(start, len)),
        (0u64..220).prop_map(Op::Remove),
        (0u64..200, 0u64..30).prop_map(|(start, len)| Op::RemoveRange(start, len)),
    ]
}

fn check_canonical(set: &IntervalSet) -> Result<(), TestCaseError> {
    let runs: Vec<_> = set.runs().copied().collect();
    for run in &runs {
        prop_assert!(run.length > 0, "empty run {:?}", run);
    }
    for pair in runs.windows(2) {
        // sorted, disjoint and never adjacent
        prop_assert!(
            pair[0].end() < pair[1].start,
            "runs {:?} and {:?} should have been merged",
            pair[0],
            pair[1]
        );
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_matches_model(ops in prop::collection::vec(op(), 1..80)) {
        let mut set = IntervalSet::new();
        let mut model = BTreeSet::new();

        for op in ops {
            match op {
                Op::Add(start, len) => {
                    set.add(start, len);
                    model.extend(start..start + len);
                }
                Op::Remove(value) => {
                    prop_assert_eq!(set.remove(value), model.remove(&value));
                }
                Op::RemoveRange(start, len) => {
                    set.remove_range(start, len);
                    for value in start..start + len {
                        model.remove(&value);
                    }
                }
            }
            check_canonical(&set)?;
        }

        prop_assert_eq!(set.size(), model.len() as u64);
        prop_assert_eq!(set.min(), model.first().copied());
        prop_assert_eq!(set.max(), model.last().copied());
        prop_assert_eq!(set.iter().collect::<Vec<_>>(), model.iter().copied().collect::<Vec<_>>());
        for probe in 0..230 {
            prop_assert_eq!(set.contains(probe), model.contains(&probe));
        }
    }

    #[test]
    fn prop_pop_min_drains_in_order(values in prop::collection::btree_set(0u64..500, 0..60)) {
        let mut set = IntervalSet::new();
        for value in &values {
            set.insert(*value);
        }

        let mut drained = Vec::new();
        while let Ok(value) = set.pop_min() {
            drained.push(value);
        }
        prop_assert!(set.is_empty());
        prop_assert_eq!(drained, values.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn prop_union_subtract(
        a in prop::collection::btree_set(0u64..300, 0..80),
        b in prop::collection::btree_set(0u64..300, 0..80),
    ) {
        let build = |values: &BTreeSet<u64>| {
            let mut set = IntervalSet::new();
            for value in values {
                set.insert(*value);
            }
            set
        };

        let mut union = build(&a);
        union.union(&build(&b));
        check_canonical(&union)?;
        prop_assert_eq!(union.size(), a.union(&b).count() as u64);

        let mut difference = build(&a);
        difference.subtract(&build(&b));
        check_canonical(&difference)?;
        prop_assert_eq!(
            difference.iter().collect::<Vec<_>>(),
            a.difference(&b).copied().collect::<Vec<_>>()
        );
    }

    #[test]
    fn prop_serde_keeps_runs(values in prop::collection::btree_set(0u64..1000, 0..100)) {
        let mut set = IntervalSet::new();
        for value in &values {
            set.insert(*value);
        }
        let json = serde_json::to_string(&set).unwrap();
        let decoded: IntervalSet = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(decoded, set);
    }

    #[test]
    fn prop_allocator_fills_holes_first(reserved in prop::collection::btree_set(0u64..64, 0..40), count in 1usize..40) {
        let mut taken = IntervalSet::new();
        for value in &reserved {
            taken.insert(*value);
        }
        let mut allocator = BlockAllocator::new(&Inventory::default(), &taken);

        let mut handed_out = Vec::new();
        for _ in 0..count {
            handed_out.push(allocator.allocate_next_block().unwrap());
        }

        let expected: Vec<u64> = (0u64..)
            .filter(|id| !reserved.contains(id))
            .take(count)
            .collect();
        prop_assert_eq!(&handed_out, &expected);
        for id in &handed_out {
            prop_assert!(allocator.current_allocation().contains(*id));
        }
    }
}
