use std::collections::BTreeMap;
use std::ops::Bound;

/// Leaf storage of a trie node.
///
/// Besides the residual-key map it keeps, per first character, how many
/// residual keys start with it. A population reaching `upper` asks the trie
/// to split that character into a child node.
#[derive(Debug)]
pub(crate) struct Bucket<V> {
    upper: usize,
    lower: usize,
    stats: BTreeMap<u8, usize>,
    items: BTreeMap<String, V>,
}

impl<V> Bucket<V> {
    pub(crate) fn new(threshold: usize, max_leaves: usize) -> Self {
        let upper = threshold.min(max_leaves).max(1);
        Self {
            upper,
            lower: upper / 2,
            stats: BTreeMap::new(),
            items: BTreeMap::new(),
        }
    }

    pub(crate) fn upper(&self) -> usize {
        self.upper
    }

    pub(crate) fn lower(&self) -> usize {
        self.lower
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn get(&self, key: &str) -> Option<&V> {
        self.items.get(key)
    }

    /// Insert or overwrite. Returns the previous value and whether a brand-new
    /// key pushed its first character's population to `upper`.
    pub(crate) fn insert(&mut self, key: String, value: V) -> (Option<V>, bool) {
        let first = key.as_bytes().first().copied();
        if let Some(previous) = self.items.insert(key, value) {
            return (Some(previous), false);
        }
        let split = match first {
            Some(c) => {
                let population = self.stats.entry(c).or_insert(0);
                *population += 1;
                *population >= self.upper
            }
            None => false,
        };
        (None, split)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<V> {
        let value = self.items.remove(key)?;
        if let Some(c) = key.as_bytes().first() {
            self.forget(*c, 1);
        }
        Some(value)
    }

    fn forget(&mut self, c: u8, n: usize) {
        if let Some(population) = self.stats.get_mut(&c) {
            *population = population.saturating_sub(n);
            if *population == 0 {
                self.stats.remove(&c);
            }
        }
    }

    /// Remove every key starting with `prefix`, returning them with the
    /// prefix stripped.
    pub(crate) fn drain_prefix(&mut self, prefix: &str) -> Vec<(String, V)> {
        let keys: Vec<String> = self
            .items
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        let mut drained = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.remove(&key) {
                drained.push((key[prefix.len()..].to_string(), value));
            }
        }
        drained
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
        self.stats.clear();
    }

    /// First characters whose population has reached `upper`.
    pub(crate) fn over_threshold(&self) -> Vec<u8> {
        self.stats
            .iter()
            .filter(|&(_, &n)| n >= self.upper)
            .map(|(&c, _)| c)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn population(&self, c: u8) -> usize {
        self.stats.get(&c).copied().unwrap_or(0)
    }

    pub(crate) fn iter(&self) -> impl DoubleEndedIterator<Item = (&String, &V)> {
        self.items.iter()
    }

    pub(crate) fn into_items(self) -> impl Iterator<Item = (String, V)> {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        let bucket: Bucket<()> = Bucket::new(1, 128);
        assert_eq!((bucket.upper(), bucket.lower()), (1, 0));

        let bucket: Bucket<()> = Bucket::new(512, 128);
        assert_eq!((bucket.upper(), bucket.lower()), (128, 64));
    }

    #[test]
    fn test_insert_reports_split() {
        let mut bucket = Bucket::new(2, 128);
        assert_eq!(bucket.insert("ab".to_string(), 1), (None, false));
        assert_eq!(bucket.insert("ab".to_string(), 2), (Some(1), false));
        assert_eq!(bucket.insert("ac".to_string(), 3), (None, true));
        assert_eq!(bucket.over_threshold(), vec![b'a']);
    }

    #[test]
    fn test_empty_key_not_counted() {
        let mut bucket = Bucket::new(1, 128);
        assert_eq!(bucket.insert(String::new(), 0), (None, false));
        assert!(bucket.over_threshold().is_empty());
        assert_eq!(bucket.remove(""), Some(0));
    }

    #[test]
    fn test_drain_prefix_strips_and_updates_stats() {
        let mut bucket = Bucket::new(8, 128);
        for key in ["a1", "a2", "b1", "a"] {
            bucket.insert(key.to_string(), key.len());
        }

        let mut drained = bucket.drain_prefix("a");
        drained.sort();
        assert_eq!(
            drained,
            vec![(String::new(), 1), ("1".to_string(), 2), ("2".to_string(), 2)]
        );
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.population(b'a'), 0);
        assert_eq!(bucket.population(b'b'), 1);
    }
}
