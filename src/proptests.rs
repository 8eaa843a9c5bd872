use crate::{RbMap, RbTree};

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 50)]
    Insert(#[proptest(strategy = "0u16..512")] u16, u32),
    #[proptest(weight = 30)]
    Remove(#[proptest(strategy = "0u16..512")] u16),
    #[proptest(weight = 18)]
    Get(#[proptest(strategy = "0u16..512")] u16),
    /// Walk in order, stopping after this many visits.
    #[proptest(weight = 2)]
    Traverse(#[proptest(strategy = "0usize..600")] usize),
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(any::<Op>(), 0..=1500)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_map_equivalence(ops in ops_strategy()) {
        let mut t: RbMap<u16, u32> = RbMap::new();
        let mut m: BTreeMap<u16, u32> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let inserted = t.insert(key, value).unwrap();
                    prop_assert_eq!(inserted, !m.contains_key(&key));
                    m.entry(key).or_insert(value);
                }
                Op::Remove(key) => {
                    prop_assert_eq!(t.remove(&key), m.remove(&key));
                }
                Op::Get(key) => {
                    prop_assert_eq!(t.get(&key), m.get(&key));
                }
                Op::Traverse(limit) => {
                    let mut seen = Vec::new();
                    let stopped = t.traverse(|k, v| {
                        seen.push((*k, *v));
                        seen.len() >= limit
                    });
                    let expected: Vec<(u16, u32)> =
                        m.iter().take(limit.max(1)).map(|(k, v)| (*k, *v)).collect();
                    prop_assert_eq!(stopped, !m.is_empty() && limit <= m.len());
                    prop_assert_eq!(seen, expected);
                }
            }

            prop_assert_eq!(t.len(), m.len());
            t.validate();
        }

        let got: Vec<(u16, u32)> = t.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: Vec<(u16, u32)> = m.into_iter().collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_tree_size_matches_walk(ops in ops_strategy()) {
        let mut t: RbTree<u16> = RbTree::new();
        let mut m: BTreeSet<u16> = BTreeSet::new();

        for op in ops {
            match op {
                Op::Insert(key, _) => {
                    let outcome = t.insert_by(key, Ord::cmp).unwrap();
                    prop_assert_eq!(outcome.is_inserted(), m.insert(key));
                }
                Op::Remove(key) => {
                    prop_assert_eq!(t.remove_by(&key, Ord::cmp), m.take(&key));
                }
                Op::Get(key) => {
                    prop_assert_eq!(t.get_by(&key, Ord::cmp), m.get(&key));
                }
                Op::Traverse(_) => {
                    prop_assert_eq!(t.size(), m.len());
                }
            }

            prop_assert_eq!(t.validate(Ord::cmp), m.len());
        }

        // Height stays within the red-black bound of 2 * log2(n + 1).
        let bound = 2 * (usize::BITS - (m.len() + 1).leading_zeros()) as usize;
        prop_assert!(t.depth() <= bound, "depth {} exceeds {}", t.depth(), bound);
    }

    #[test]
    fn prop_clone_round_trip(
        keys in prop::collection::vec(any::<u16>(), 0..=300),
        extra in any::<u16>(),
    ) {
        let mut t: RbMap<u16, String> = RbMap::new();
        for k in &keys {
            t.insert(*k, k.to_string()).unwrap();
        }

        let mut c = t.try_clone().unwrap();
        c.validate();

        let mut original = Vec::new();
        t.traverse(|k, v| {
            original.push((*k, v.clone()));
            false
        });
        let mut copied = Vec::new();
        c.traverse(|k, v| {
            copied.push((*k, v.clone()));
            false
        });
        prop_assert_eq!(&original, &copied);

        let was_present = t.contains_key(&extra);
        if was_present {
            c.remove(&extra);
        } else {
            c.insert(extra, String::new()).unwrap();
        }
        prop_assert_eq!(t.contains_key(&extra), was_present);
        prop_assert_eq!(t.len(), original.len());
        let after: Vec<(u16, String)> = t.iter().map(|(k, v)| (*k, v.clone())).collect();
        prop_assert_eq!(after, original);
    }

    #[test]
    fn prop_free_runs_once_per_association(
        keys in prop::collection::vec(0u16..128, 0..=400),
        removed in prop::collection::vec(0u16..128, 0..=50),
    ) {
        let freed = Rc::new(Cell::new(0usize));
        let mut t = {
            let freed = Rc::clone(&freed);
            RbMap::builder(|a: &u16, b: &u16| a.cmp(b))
                .free_value(move |_: u16| freed.set(freed.get() + 1))
                .build()
        };

        let mut distinct = BTreeSet::new();
        for k in keys {
            t.insert(k, k).unwrap();
            distinct.insert(k);
        }
        for k in removed {
            if t.remove(&k).is_some() {
                distinct.remove(&k);
            }
        }

        drop(t);
        prop_assert_eq!(freed.get(), distinct.len());
    }
}

/// Calls `f` with every ordering of `keys`, generated in place by Heap's
/// algorithm.
fn orderings<T: Copy>(keys: &[T], mut f: impl FnMut(&[T])) {
    let mut order = keys.to_vec();
    let mut swaps = vec![0usize; order.len()];
    f(&order);

    let mut i = 1;
    while i < order.len() {
        if swaps[i] < i {
            let j = if i % 2 == 0 { 0 } else { swaps[i] };
            order.swap(j, i);
            f(&order);
            swaps[i] += 1;
            i = 1;
        } else {
            swaps[i] = 0;
            i += 1;
        }
    }
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys: Vec<u8> = (1..=7).collect();

    let mut seen = 0usize;
    orderings(&keys, |order| {
        seen += 1;
        let mut t: RbMap<u8, u8> = RbMap::new();
        for (i, &k) in order.iter().enumerate() {
            assert!(t.insert(k, i as u8).unwrap());
            t.validate();
        }
        let got: Vec<u8> = t.keys().copied().collect();
        assert_eq!(got, keys);
    });
    assert_eq!(seen, 5040);
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys: Vec<u8> = (1..=7).collect();

    // Insert in a fixed order, then remove in all permutations.
    let mut base: RbMap<u8, u8> = RbMap::new();
    for &k in &keys {
        base.insert(k, k).unwrap();
    }

    orderings(&keys, |order| {
        let mut t = base.try_clone().unwrap();
        let mut m: BTreeMap<u8, u8> = keys.iter().map(|&k| (k, k)).collect();

        for k in order {
            assert_eq!(t.remove(k), m.remove(k));
            assert_eq!(t.len(), m.len());
            t.validate();
        }
        assert!(t.is_empty());
        assert_eq!(t.depth(), 0);
    });
}
