//! In-memory radix trie mapping string keys to values.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]; the parent
//! link is only used to walk upward when counts or dirty bits change. Each
//! node keeps its residual keys in a leaf [`Bucket`] until enough of them
//! share a first character, at which point that character is split off into
//! a child node. Children whose subtree shrinks below half the parent's
//! capacity are folded back into the parent's bucket.

mod bucket;
mod iter;
#[cfg(test)]
mod proptests;

pub use iter::Iter;

use crate::error::{Result, StorageError};
use crate::keyclass::{bytes_to_key, KeyClass};
use bucket::Bucket;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

/// Arena index of a trie node.
pub type NodeId = usize;

const ROOT: NodeId = 0;

/// Leaf capacity tuning for [`RadixTrie`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieConfig {
    /// Split threshold of the root bucket (default: 1).
    ///
    /// A child's threshold is its parent's capacity doubled once per
    /// character of the child's prefix.
    pub base_threshold: usize,

    /// Upper bound on any bucket's split threshold (default: 128).
    pub max_leaves: usize,
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self {
            base_threshold: 1,
            max_leaves: 128,
        }
    }
}

fn child_threshold(parent_upper: usize, prefix_len: usize) -> usize {
    if prefix_len >= usize::BITS as usize {
        return usize::MAX;
    }
    parent_upper.saturating_mul(1usize << prefix_len)
}

#[derive(Debug)]
struct Node<V> {
    prefix: String,
    parent: Option<NodeId>,
    pinned: bool,
    modified: bool,
    count: usize,
    children: BTreeMap<String, NodeId>,
    leaves: Bucket<V>,
}

impl<V> Node<V> {
    fn new(prefix: String, parent: Option<NodeId>, threshold: usize, config: &TrieConfig, pinned: bool) -> Self {
        Self {
            prefix,
            parent,
            pinned,
            modified: false,
            count: 0,
            children: BTreeMap::new(),
            leaves: Bucket::new(threshold, config.max_leaves),
        }
    }
}

#[derive(Debug)]
struct Arena<V> {
    slots: Vec<Option<Node<V>>>,
    free: Vec<NodeId>,
}

impl<V> Arena<V> {
    fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new() }
    }

    fn alloc(&mut self, node: Node<V>) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) -> Option<Node<V>> {
        debug_assert_ne!(id, ROOT, "the root slot is never recycled");
        let node = self.slots.get_mut(id)?.take();
        if node.is_some() {
            self.free.push(id);
        }
        node
    }

    fn is_live(&self, id: NodeId) -> bool {
        matches!(self.slots.get(id), Some(Some(_)))
    }

    fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

impl<V> Index<NodeId> for Arena<V> {
    type Output = Node<V>;

    fn index(&self, id: NodeId) -> &Node<V> {
        match &self.slots[id] {
            Some(node) => node,
            None => panic!("trie node {} used after release", id),
        }
    }
}

impl<V> IndexMut<NodeId> for Arena<V> {
    fn index_mut(&mut self, id: NodeId) -> &mut Node<V> {
        match &mut self.slots[id] {
            Some(node) => node,
            None => panic!("trie node {} used after release", id),
        }
    }
}

/// Radix trie keyed by strings sharing the root prefix.
///
/// All operations take full keys. Keys stored by [`put`](Self::put) must
/// satisfy the trie's [`KeyClass`]; lookups and deletions only require the
/// key to start with the root prefix and fail with `KeyOutOfRange` otherwise.
///
/// # Example
///
/// ```
/// use triekv::index::RadixTrie;
/// use triekv::keyclass::KeyClass;
///
/// let mut trie = RadixTrie::new("ab", KeyClass::hex()).unwrap();
/// trie.put("ab01", 1).unwrap();
/// trie.put("ab02", 2).unwrap();
///
/// assert_eq!(trie.get("ab01").unwrap(), Some(&1));
/// assert_eq!(trie.trim("ab0").unwrap(), 2);
/// assert!(trie.is_empty());
/// ```
#[derive(Debug)]
pub struct RadixTrie<V> {
    arena: Arena<V>,
    key_class: KeyClass,
    config: TrieConfig,
}

impl<V> RadixTrie<V> {
    pub fn new(prefix: impl Into<String>, key_class: KeyClass) -> Result<Self> {
        Self::with_config(prefix, key_class, TrieConfig::default())
    }

    /// Create an empty trie whose keys all start with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if `prefix` uses characters outside the key class.
    pub fn with_config(prefix: impl Into<String>, key_class: KeyClass, config: TrieConfig) -> Result<Self> {
        let prefix = prefix.into();
        if !key_class.check_chars(&prefix) {
            return Err(StorageError::InvalidKey { key: prefix });
        }

        let mut arena = Arena::new();
        arena.alloc(Node::new(prefix, None, config.base_threshold, &config, true));

        Ok(Self { arena, key_class, config })
    }

    /// Trie for byte-derived hex keys, pre-partitioned into 256 pinned
    /// buckets `00`..`ff` below the root.
    pub fn hashed(prefix: impl Into<String>) -> Result<Self> {
        let mut trie = Self::new(prefix, KeyClass::hex_even())?;
        for byte in 0..=u8::MAX {
            trie.pin(&bytes_to_key(&[byte], false))?;
        }
        Ok(trie)
    }

    pub fn prefix(&self) -> &str {
        &self.arena[ROOT].prefix
    }

    pub fn key_class(&self) -> &KeyClass {
        &self.key_class
    }

    pub fn config(&self) -> &TrieConfig {
        &self.config
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.arena[ROOT].count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live nodes, the root included.
    pub fn node_count(&self) -> usize {
        self.arena.live()
    }

    /// Whether anything changed since creation or the last [`mark_clean`](Self::mark_clean).
    pub fn is_modified(&self) -> bool {
        self.arena[ROOT].modified
    }

    pub fn mark_clean(&mut self) {
        for node in self.arena.slots.iter_mut().flatten() {
            node.modified = false;
        }
    }

    /// `key` with the root prefix removed.
    pub fn nick<'k>(&self, key: &'k str) -> Result<&'k str> {
        self.relative(ROOT, key)
    }

    fn relative<'k>(&self, id: NodeId, key: &'k str) -> Result<&'k str> {
        let prefix = &self.arena[id].prefix;
        key.strip_prefix(prefix.as_str())
            .ok_or_else(|| StorageError::KeyOutOfRange {
                key: key.to_string(),
                prefix: prefix.clone(),
            })
    }

    fn find_child(&self, id: NodeId, rest: &str) -> Option<NodeId> {
        let children = &self.arena[id].children;
        if children.is_empty() {
            return None;
        }
        (1..=rest.len())
            .filter(|&end| rest.is_char_boundary(end))
            .find_map(|end| children.get(&rest[..end]).copied())
    }

    /// Deepest node on the path of `key` and the part of the key left over.
    fn locate<'k>(&self, key: &'k str) -> Result<(NodeId, &'k str)> {
        let mut id = ROOT;
        let mut rest = self.relative(ROOT, key)?;
        while let Some(child) = self.find_child(id, rest) {
            rest = &rest[self.arena[child].prefix.len()..];
            id = child;
        }
        Ok((id, rest))
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn get(&self, key: &str) -> Result<Option<&V>> {
        let (id, rest) = self.locate(key)?;
        Ok(self.arena[id].leaves.get(rest))
    }

    /// Insert or overwrite `key`, marking the path dirty.
    ///
    /// Returns `true` when the key was not present before.
    pub fn put(&mut self, key: &str, value: V) -> Result<bool> {
        self.put_with(key, value, true)
    }

    /// Insert or overwrite `key`; the dirty bits are left alone unless `modify`.
    pub fn put_with(&mut self, key: &str, value: V, modify: bool) -> Result<bool> {
        self.key_class.validate(key)?;
        let (id, rest) = self.locate(key)?;

        let (previous, split) = self.arena[id].leaves.insert(rest.to_string(), value);
        let inserted = previous.is_none();
        if inserted {
            self.increment(id, 1);
        }
        if modify {
            self.mark_modified(id);
        }
        if split {
            if let Some(&first) = rest.as_bytes().first() {
                self.split(id, first, modify);
            }
        }
        Ok(inserted)
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Result<Option<V>> {
        let (id, rest) = self.locate(key)?;
        let value = match self.arena[id].leaves.remove(rest) {
            Some(value) => value,
            None => return Ok(None),
        };
        self.mark_modified(id);
        self.decrement(id, 1);
        Ok(Some(value))
    }

    /// Remove `key`; `false` if it was absent.
    pub fn pop(&mut self, key: &str) -> Result<bool> {
        Ok(self.remove(key)?.is_some())
    }

    /// Remove every key starting with `prefix` and return how many went.
    ///
    /// A prefix that the root prefix itself starts with clears the whole trie.
    /// Pinned nodes are emptied but stay in place.
    pub fn trim(&mut self, prefix: &str) -> Result<usize> {
        let mut id = ROOT;
        let mut rest = if self.prefix().starts_with(prefix) {
            ""
        } else {
            self.relative(ROOT, prefix)?
        };

        let removed = loop {
            match self.find_child(id, rest) {
                Some(child) => {
                    let child_rest = &rest[self.arena[child].prefix.len()..];
                    if child_rest.is_empty() {
                        break self.cut(id, child);
                    }
                    id = child;
                    rest = child_rest;
                }
                None => {
                    let matched: Vec<NodeId> = self.arena[id]
                        .children
                        .iter()
                        .filter(|(key, _)| key.starts_with(rest))
                        .map(|(_, &child)| child)
                        .collect();
                    let mut removed = 0;
                    for child in matched {
                        removed += self.cut(id, child);
                    }
                    removed += self.arena[id].leaves.drain_prefix(rest).len();
                    break removed;
                }
            }
        };

        if removed > 0 {
            self.mark_modified(id);
            self.decrement(id, removed);
        }
        Ok(removed)
    }

    /// Create a permanent child `prefix` (relative to the root) that is never
    /// merged away or fused, not even when a trim empties it.
    pub fn pin(&mut self, prefix: &str) -> Result<()> {
        if prefix.is_empty() || !self.key_class.check_chars(prefix) {
            return Err(StorageError::InvalidKey { key: prefix.to_string() });
        }
        if let Some(&existing) = self.arena[ROOT].children.get(prefix) {
            self.arena[existing].pinned = true;
            return Ok(());
        }

        let threshold = child_threshold(self.arena[ROOT].leaves.upper(), prefix.len());
        let node = Node::new(prefix.to_string(), Some(ROOT), threshold, &self.config, true);
        let child = self.arena.alloc(node);
        self.attach(ROOT, child, false);
        Ok(())
    }

    /// Snapshot iterator over `(key, value)` pairs.
    ///
    /// The node list is captured when the iterator is created; keys come out
    /// node by node in name order, sorted within each node, which is not a
    /// total order over the trie.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter::new(self)
    }

    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.iter().map(|(key, _)| key)
    }

    fn increment(&mut self, id: NodeId, n: usize) {
        let mut current = Some(id);
        while let Some(id) = current {
            self.arena[id].count += n;
            current = self.arena[id].parent;
        }
    }

    fn mark_modified(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(id) = current {
            let node = &mut self.arena[id];
            if node.modified {
                break;
            }
            node.modified = true;
            current = node.parent;
        }
    }

    /// Subtract `n` up the path from `id`, folding small children back into
    /// their parent and dropping empty ones along the way.
    fn decrement(&mut self, id: NodeId, n: usize) {
        if n == 0 {
            return;
        }
        let mut previous: Option<NodeId> = None;
        let mut current = Some(id);
        while let Some(id) = current {
            let node = &mut self.arena[id];
            debug_assert!(node.count >= n);
            node.count -= n;
            if let Some(child) = previous {
                self.merge_back(id, child);
            }
            previous = Some(id);
            current = self.arena[id].parent;
        }
    }

    fn merge_back(&mut self, parent: NodeId, child: NodeId) {
        let node = &self.arena[child];
        if node.pinned {
            return;
        }
        let count = node.count;
        if count == 0 {
            let prefix = node.prefix.clone();
            self.arena[parent].children.remove(&prefix);
            self.drain_subtree(child);
        } else if count <= self.arena[parent].leaves.lower() {
            let prefix = node.prefix.clone();
            self.arena[parent].children.remove(&prefix);
            for (key, value) in self.drain_subtree(child) {
                self.arena[parent].leaves.insert(key, value);
            }
        }
    }

    /// Split `first` off node `id` into a new child, recursing while new
    /// children are over their own threshold, then fuse single-child chains.
    fn split(&mut self, id: NodeId, first: u8, modify: bool) {
        let mut pending = vec![(id, first)];
        let mut created = Vec::new();

        while let Some((parent, c)) = pending.pop() {
            let prefix = (c as char).to_string();
            if self.arena[parent].children.contains_key(&prefix) {
                continue;
            }
            let threshold = child_threshold(self.arena[parent].leaves.upper(), prefix.len());
            let node = Node::new(prefix, Some(parent), threshold, &self.config, false);
            let child = self.arena.alloc(node);
            self.attach(parent, child, modify);

            pending.extend(self.arena[child].leaves.over_threshold().into_iter().map(|c| (child, c)));
            created.push(child);
        }

        for id in created.into_iter().rev() {
            if self.arena.is_live(id) {
                self.compact_path(id, modify);
            }
        }
    }

    /// Hang `child` under `parent`, moving over every leaf and child of
    /// `parent` that falls under the child's prefix.
    fn attach(&mut self, parent: NodeId, child: NodeId, modify: bool) {
        let prefix = self.arena[child].prefix.clone();

        let moved = self.arena[parent].leaves.drain_prefix(&prefix);
        let moved_leaves = moved.len();
        for (key, value) in moved {
            self.arena[child].leaves.insert(key, value);
        }
        self.arena[child].count += moved_leaves;

        let adopted: Vec<(String, NodeId)> = self.arena[parent]
            .children
            .iter()
            .filter(|(key, _)| key.len() > prefix.len() && key.starts_with(prefix.as_str()))
            .map(|(key, &id)| (key.clone(), id))
            .collect();
        for (key, grandchild) in adopted {
            self.arena[parent].children.remove(&key);
            let stripped = key[prefix.len()..].to_string();
            let node = &mut self.arena[grandchild];
            node.prefix = stripped.clone();
            node.parent = Some(child);
            let count = node.count;

            let node = &mut self.arena[child];
            node.count += count;
            node.children.insert(stripped, grandchild);
        }

        self.arena[child].parent = Some(parent);
        self.arena[parent].children.insert(prefix, child);
        if modify && moved_leaves > 0 {
            self.mark_modified(child);
        }
    }

    /// Walk up from `start`, fusing leafless single-child nodes into their
    /// only child. Nodes right below a pinned node are left alone.
    fn compact_path(&mut self, start: NodeId, modify: bool) {
        let mut id = start;
        while let Some(parent) = self.arena[id].parent {
            if self.arena[parent].pinned {
                break;
            }
            let node = &self.arena[id];
            if !node.pinned && node.leaves.is_empty() && node.children.len() == 1 {
                let prefix = node.prefix.clone();
                if let Some(&only) = node.children.values().next() {
                    self.arena[parent].children.remove(&prefix);
                    self.arena.release(id);
                    let fused = format!("{}{}", prefix, self.arena[only].prefix);
                    self.arena[only].prefix = fused;
                    self.attach(parent, only, modify);
                }
            }
            id = parent;
        }
    }

    /// Detach `child` from `parent` and drop its contents, returning how many
    /// keys went with it.
    fn cut(&mut self, parent: NodeId, child: NodeId) -> usize {
        let count = self.arena[child].count;
        if self.arena[child].pinned {
            let grandchildren = std::mem::take(&mut self.arena[child].children);
            for grandchild in grandchildren.into_values() {
                self.drain_subtree(grandchild);
            }
            let node = &mut self.arena[child];
            node.leaves.clear();
            node.count = 0;
        } else {
            let prefix = self.arena[child].prefix.clone();
            self.arena[parent].children.remove(&prefix);
            self.drain_subtree(child);
        }
        count
    }

    /// Release `id` and its descendants, returning their entries keyed
    /// relative to the parent of `id`.
    fn drain_subtree(&mut self, id: NodeId) -> Vec<(String, V)> {
        let mut entries = Vec::new();
        let mut stack = vec![(id, String::new())];

        while let Some((id, base)) = stack.pop() {
            let node = match self.arena.release(id) {
                Some(node) => node,
                None => continue,
            };
            let name = format!("{}{}", base, node.prefix);
            for child in node.children.into_values() {
                stack.push((child, name.clone()));
            }
            for (key, value) in node.leaves.into_items() {
                entries.push((format!("{}{}", name, key), value));
            }
        }

        entries
    }
}
