//! Bounded least-recently-used cache.
//!
//! Used to remember the results of recent executions keyed by their exact
//! choice values, so the shrinker does not re-run candidates it has already
//! tried. Capacity is fixed up front; inserting into a full cache evicts the
//! entry that was touched least recently.
//!
//! Eviction order is the `lru` crate's; this wrapper only adds the hit and
//! miss counts that are logged when a run finishes.

use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;

pub struct LruCache<K, V> {
    inner: lru::LruCache<K, V>,
    hits: u64,
    misses: u64,
}

impl<K: Hash + Eq, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("len", &self.inner.len())
            .field("capacity", &self.inner.cap())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

impl<K: Hash + Eq, V> LruCache<K, V> {
    /// A cache holding at most `capacity` entries. A capacity of zero is
    /// treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        LruCache { inner: lru::LruCache::new(capacity), hits: 0, misses: 0 }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        let value = self.inner.get(key);
        if value.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        value
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.inner.put(key, value);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(&1));
        cache.insert("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.get(&"c"), Some(&3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinsert_updates_value_without_growing() {
        let mut cache = LruCache::new(2);
        cache.insert(1, "x");
        cache.insert(1, "y");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&1), Some(&"y"));
        assert_eq!(cache.stats(), (1, 0));
    }

    #[test]
    fn misses_are_counted() {
        let mut cache: LruCache<u32, u32> = LruCache::new(0);
        assert_eq!(cache.get(&1), None);
        cache.insert(1, 10);
        cache.insert(2, 20);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(&20));
        assert_eq!(cache.stats(), (1, 2));
    }
}
