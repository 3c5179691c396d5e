use super::{NodeId, RadixTrie, ROOT};
use std::collections::VecDeque;

/// Point-in-time iterator over a [`RadixTrie`].
///
/// The list of nodes and their full names is taken at construction; leaves
/// of each node are collected when the iterator reaches it. The shared
/// borrow of the trie keeps it from being mutated meanwhile.
pub struct Iter<'a, V> {
    trie: &'a RadixTrie<V>,
    /// Pending nodes, sorted so that `pop` yields them in name order
    nodes: Vec<(String, NodeId)>,
    /// Pending leaves of the current node, reversed
    leaves: Vec<(String, &'a V)>,
}

impl<'a, V> Iter<'a, V> {
    pub(super) fn new(trie: &'a RadixTrie<V>) -> Self {
        let mut nodes = Vec::new();
        let mut queue = VecDeque::from([(trie.arena[ROOT].prefix.clone(), ROOT)]);

        while let Some((name, id)) = queue.pop_front() {
            for (prefix, &child) in &trie.arena[id].children {
                queue.push_back((format!("{}{}", name, prefix), child));
            }
            nodes.push((name, id));
        }
        nodes.sort_by(|a, b| b.0.cmp(&a.0));

        Self {
            trie,
            nodes,
            leaves: Vec::new(),
        }
    }
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (String, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.leaves.pop() {
                return Some(item);
            }
            let (name, id) = self.nodes.pop()?;
            let trie: &'a RadixTrie<V> = self.trie;
            self.leaves = trie.arena[id]
                .leaves
                .iter()
                .rev()
                .map(|(key, value)| (format!("{}{}", name, key), value))
                .collect();
        }
    }
}
