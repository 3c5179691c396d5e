//! Two-tier cache: a recency tier backed by [`lru::LruCache`] and a
//! frequency tier that evicts its least used entry.
//!
//! New entries land in the recency tier. A hit there moves the entry to the
//! frequency tier, so one-off lookups never push out entries that keep
//! getting used.

use crate::error::{Result, StorageError};
use lru::LruCache;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Share of the capacity given to the recency tier, in percent.
const RECENT_SHARE: usize = 40;

struct Slot<V> {
    value: V,
    hits: u64,
    tick: u64,
}

/// Least-frequently-used map; ties go to the entry touched longest ago.
struct LfuTier<K, V> {
    capacity: usize,
    tick: u64,
    slots: HashMap<K, Slot<V>>,
    /// (hits, tick) of every slot, the smallest first.
    order: BTreeMap<(u64, u64), K>,
}

impl<K: Hash + Eq + Clone, V> LfuTier<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            slots: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    fn peek(&self, key: &K) -> Option<&V> {
        self.slots.get(key).map(|slot| &slot.value)
    }

    fn touch(&mut self, key: &K) -> Option<&mut V> {
        let slot = self.slots.get_mut(key)?;
        self.order.remove(&(slot.hits, slot.tick));
        self.tick += 1;
        slot.hits += 1;
        slot.tick = self.tick;
        self.order.insert((slot.hits, slot.tick), key.clone());
        Some(&mut slot.value)
    }

    /// Insert a key that is not present yet, returning the evicted entry.
    fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        let evicted = if self.slots.len() >= self.capacity {
            self.evict()
        } else {
            None
        };
        self.tick += 1;
        self.order.insert((1, self.tick), key.clone());
        self.slots.insert(key, Slot { value, hits: 1, tick: self.tick });
        evicted
    }

    fn evict(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let slot = self.slots.remove(&key)?;
        Some((key, slot.value))
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&(slot.hits, slot.tick));
        Some(slot.value)
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.order.clear();
    }
}

/// Bounded cache with a recently-used and a frequently-used tier.
///
/// # Example
///
/// ```
/// use triekv::cache::TieredCache;
///
/// let mut cache = TieredCache::new(10)?;
/// cache.insert("a".to_string(), 1);
/// assert_eq!(cache.get(&"a".to_string()), Some(&1));
/// # Ok::<(), triekv::StorageError>(())
/// ```
pub struct TieredCache<K: Hash + Eq, V> {
    recent: LruCache<K, V>,
    frequent: LfuTier<K, V>,
}

impl<K: Hash + Eq + Clone, V> TieredCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `capacity` is below 2, since each tier needs
    /// room for at least one entry.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 2 {
            return Err(StorageError::ConfigError(format!(
                "cache capacity must be at least 2, got {}",
                capacity
            )));
        }
        let recent = (capacity * RECENT_SHARE / 100).clamp(1, capacity - 1);
        let frequent = capacity - recent;
        let recent = NonZeroUsize::new(recent).ok_or_else(|| {
            StorageError::ConfigError("recency tier cannot be empty".to_string())
        })?;

        Ok(Self {
            recent: LruCache::new(recent),
            frequent: LfuTier::new(frequent),
        })
    }

    pub fn capacity(&self) -> usize {
        self.recent.cap().get() + self.frequent.capacity
    }

    pub fn len(&self) -> usize {
        self.recent.len() + self.frequent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Presence check that does not count as a use.
    pub fn contains(&self, key: &K) -> bool {
        self.frequent.contains(key) || self.recent.contains(key)
    }

    /// Lookup that does not count as a use.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.frequent.peek(key).or_else(|| self.recent.peek(key))
    }

    /// Mutable lookup that does not count as a use.
    pub fn peek_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.frequent.slots.get_mut(key) {
            Some(slot) => Some(&mut slot.value),
            None => self.recent.peek_mut(key),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.get_mut(key).map(|value| &*value)
    }

    /// Lookup that counts as a use, promoting a recency-tier hit.
    ///
    /// Promotion may evict the least used frequency-tier entry, which is
    /// dropped.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.frequent.contains(key) {
            let value = self.recent.pop(key)?;
            self.frequent.insert(key.clone(), value);
        }
        self.frequent.touch(key)
    }

    /// Inserts or replaces `key`, returning the entry evicted to make room.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.frequent.touch(&key) {
            *slot = value;
            return None;
        }
        if self.recent.contains(&key) {
            self.recent.put(key, value);
            return None;
        }
        self.recent.push(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.frequent.remove(key).or_else(|| self.recent.pop(key))
    }

    /// Keys of both tiers, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        self.frequent
            .slots
            .keys()
            .chain(self.recent.iter().map(|(key, _)| key))
            .cloned()
            .collect()
    }

    /// Mutable access to every value without touching the usage order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> + '_ {
        self.frequent
            .slots
            .values_mut()
            .map(|slot| &mut slot.value)
            .chain(self.recent.iter_mut().map(|(_, value)| value))
    }

    pub fn clear(&mut self) {
        self.recent.clear();
        self.frequent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> String {
        format!("k{}", n)
    }

    #[test]
    fn test_rejects_tiny_capacity() {
        assert!(TieredCache::<String, u32>::new(0).is_err());
        assert!(TieredCache::<String, u32>::new(1).is_err());
        assert_eq!(TieredCache::<String, u32>::new(2).unwrap().capacity(), 2);
        assert_eq!(TieredCache::<String, u32>::new(10).unwrap().capacity(), 10);
    }

    #[test]
    fn test_insert_get_remove() {
        let mut cache = TieredCache::new(10).unwrap();
        assert_eq!(cache.insert(key(1), 1), None);
        assert_eq!(cache.peek(&key(1)), Some(&1));
        assert_eq!(cache.get(&key(1)), Some(&1));

        // replacing in either tier keeps a single entry
        cache.insert(key(1), 10);
        cache.insert(key(2), 2);
        cache.insert(key(2), 20);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key(1)), Some(&10));
        assert_eq!(cache.get(&key(2)), Some(&20));

        assert_eq!(cache.remove(&key(1)), Some(10));
        assert_eq!(cache.remove(&key(1)), None);
        assert!(!cache.contains(&key(1)));
        assert_eq!(cache.get(&key(3)), None);
    }

    #[test]
    fn test_recent_tier_evicts_lru() {
        // 4 recent slots, 6 frequent slots
        let mut cache = TieredCache::new(10).unwrap();
        for n in 0..4 {
            assert_eq!(cache.insert(key(n), n), None);
        }
        assert_eq!(cache.insert(key(4), 4), Some((key(0), 0)));
        assert!(!cache.contains(&key(0)));
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_promoted_entries_survive_scans() {
        let mut cache = TieredCache::new(10).unwrap();
        cache.insert(key(0), 0);
        assert_eq!(cache.get(&key(0)), Some(&0));

        for n in 1..100 {
            cache.insert(key(n), n);
        }
        assert!(cache.contains(&key(0)));
        assert!(cache.len() <= cache.capacity());
    }

    #[test]
    fn test_frequent_tier_evicts_least_used() {
        let mut cache = TieredCache::new(5).unwrap();
        // 2 recent slots, 3 frequent slots
        for n in 0..3 {
            cache.insert(key(n), n);
            cache.get(&key(n));
        }
        cache.get(&key(0));
        cache.get(&key(2));

        cache.insert(key(3), 3);
        cache.get(&key(3));
        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(0)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn test_keys_and_values_mut() {
        let mut cache = TieredCache::new(10).unwrap();
        cache.insert(key(1), 1);
        cache.insert(key(2), 2);
        cache.get(&key(2));

        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec![key(1), key(2)]);

        for value in cache.values_mut() {
            *value *= 10;
        }
        assert_eq!(cache.peek(&key(1)), Some(&10));
        assert_eq!(cache.peek(&key(2)), Some(&20));

        if let Some(value) = cache.peek_mut(&key(1)) {
            *value += 1;
        }
        assert_eq!(cache.peek(&key(1)), Some(&11));

        cache.clear();
        assert!(cache.is_empty());
    }
}
