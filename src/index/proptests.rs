use super::*;

use proptest::prelude::*;
use std::collections::BTreeMap as Model;

/// Walk every live node and check the structural invariants: counts add up,
/// parent and child links agree, and children are keyed by their prefix.
fn validate_trie<V>(t: &RadixTrie<V>) {
    let mut stack = vec![ROOT];
    let mut reachable = 0usize;

    while let Some(id) = stack.pop() {
        reachable += 1;
        let node = &t.arena[id];
        if id != ROOT {
            assert!(!node.prefix.is_empty(), "non-root node with empty prefix");
        }

        let mut subtree = node.leaves.len();
        for (prefix, &child) in &node.children {
            let child_node = &t.arena[child];
            assert_eq!(&child_node.prefix, prefix, "child keyed by a stale prefix");
            assert_eq!(child_node.parent, Some(id), "child parent link is stale");
            subtree += child_node.count;
            stack.push(child);
        }
        assert_eq!(node.count, subtree, "count of node {} out of sync", id);
    }

    assert_eq!(reachable, t.node_count(), "unreachable live nodes");
}

/// After a sequence of inserts no bucket holds `upper` keys behind one character.
fn validate_thresholds<V>(t: &RadixTrie<V>) {
    for node in t.arena.slots.iter().flatten() {
        assert!(
            node.leaves.over_threshold().is_empty(),
            "bucket of {:?} over its split threshold",
            node.prefix
        );
    }
}

#[derive(Clone, Debug)]
enum Op {
    Put(String, u32),
    Pop(String),
    Trim(String),
}

fn key_strategy() -> impl Strategy<Value = String> + Clone {
    "[abc]{1,6}"
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy();
    let op = prop_oneof![
        60 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
        35 => key.clone().prop_map(Op::Pop),
        5 => "[abc]{0,3}".prop_map(Op::Trim),
    ];
    prop::collection::vec(op, 0..=400)
}

fn small_config() -> TrieConfig {
    TrieConfig { base_threshold: 1, max_leaves: 8 }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_matches_model(ops in ops_strategy()) {
        let class = KeyClass::new(16, "abc").unwrap();
        let mut t: RadixTrie<u32> = RadixTrie::with_config("", class, small_config()).unwrap();
        let mut m: Model<String, u32> = Model::new();

        for op in ops {
            match op {
                Op::Put(key, value) => {
                    let inserted = t.put(&key, value).unwrap();
                    prop_assert_eq!(inserted, m.insert(key, value).is_none());
                }
                Op::Pop(key) => {
                    let popped = t.pop(&key).unwrap();
                    prop_assert_eq!(popped, m.remove(&key).is_some());
                }
                Op::Trim(prefix) => {
                    let doomed: Vec<String> = m.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
                    prop_assert_eq!(t.trim(&prefix).unwrap(), doomed.len());
                    for key in doomed {
                        m.remove(&key);
                    }
                    prop_assert_eq!(t.trim(&prefix).unwrap(), 0);
                }
            }

            validate_trie(&t);
            prop_assert_eq!(t.len(), m.len());
        }

        let mut got: Vec<(String, u32)> = t.iter().map(|(k, v)| (k, *v)).collect();
        got.sort();
        let expected: Vec<(String, u32)> = m.into_iter().collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_inserts_respect_thresholds(keys in prop::collection::vec(key_strategy(), 0..=300)) {
        let class = KeyClass::new(16, "abc").unwrap();
        let mut t: RadixTrie<()> = RadixTrie::with_config("", class, small_config()).unwrap();

        for key in &keys {
            t.put(key, ()).unwrap();
            validate_thresholds(&t);
        }
        validate_trie(&t);

        for key in &keys {
            prop_assert!(t.contains(key).unwrap());
        }
    }

    #[test]
    fn prop_hashed_trim_clears(bytes in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..4), 0..100)) {
        let mut t: RadixTrie<usize> = RadixTrie::hashed("").unwrap();
        let mut m: Model<String, usize> = Model::new();
        for (i, b) in bytes.iter().enumerate() {
            let key = bytes_to_key(b, false);
            t.put(&key, i).unwrap();
            m.insert(key, i);
        }
        validate_trie(&t);
        prop_assert_eq!(t.len(), m.len());

        prop_assert_eq!(t.trim("").unwrap(), m.len());
        validate_trie(&t);
        prop_assert_eq!(t.node_count(), 257);
    }
}
