//! Reference-counted, time-expiring cache of shared objects.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct CacheEntry<V> {
    value: Arc<V>,
    last_used: f64,
}

struct Inner<K, V> {
    entries: BTreeMap<K, CacheEntry<V>>,
    reference_time: f64,
}

/// Ordered map from keys to `Arc`-shared values with timestamp-based expiry.
///
/// Entries still referenced outside the cache are refreshed by
/// [`update_timestamps`](Self::update_timestamps); entries nobody has
/// touched for longer than the expiry delay are dropped by
/// [`remove_expired`](Self::remove_expired). The map is ordered so callers
/// can find related entries with [`lower_bound`](Self::lower_bound).
pub struct ObjectCache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K: Ord + Clone, V> Default for ObjectCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V> ObjectCache<K, V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                reference_time: 0.0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.lock().entries.get(key).map(|e| Arc::clone(&e.value))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Insert `value` unless `key` is already cached, returning the cached value.
    ///
    /// New entries are stamped with the last reference time.
    pub fn insert(&self, key: K, value: Arc<V>) -> Arc<V> {
        let mut inner = self.lock();
        let now = inner.reference_time;
        let entry = inner.entries.entry(key).or_insert(CacheEntry {
            value,
            last_used: now,
        });
        Arc::clone(&entry.value)
    }

    /// First entry whose key is `>= key`.
    pub fn lower_bound(&self, key: &K) -> Option<(K, Arc<V>)> {
        self.lock()
            .entries
            .range((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(|(k, e)| (k.clone(), Arc::clone(&e.value)))
    }

    /// Stamp every entry that is referenced outside the cache with `reference_time`.
    pub fn update_timestamps(&self, reference_time: f64) {
        let mut inner = self.lock();
        inner.reference_time = reference_time;
        for entry in inner.entries.values_mut() {
            if Arc::strong_count(&entry.value) > 1 {
                entry.last_used = reference_time;
            }
        }
    }

    /// Drop entries last used before `reference_time - expiry_delay`, where
    /// the reference time is the one given to the last
    /// [`update_timestamps`](Self::update_timestamps). Returns how many were dropped.
    pub fn remove_expired(&self, expiry_delay: f64) -> usize {
        let mut inner = self.lock();
        let cutoff = inner.reference_time - expiry_delay;
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.last_used >= cutoff);
        before - inner.entries.len()
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.lock().entries.remove(key).map(|e| e.value)
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Visit every cached value. The cache is locked for the duration.
    pub fn for_each(&self, mut f: impl FnMut(&K, &Arc<V>)) {
        for (k, e) in self.lock().entries.iter() {
            f(k, &e.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_first_value() {
        let cache = ObjectCache::<u32, String>::new();
        let first = cache.insert(1, Arc::new("a".into()));
        let second = cache.insert(1, Arc::new("b".into()));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.get(&1).as_deref().map(String::as_str), Some("a"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lower_bound() {
        let cache = ObjectCache::<(u32, u32), u32>::new();
        cache.insert((1, 5), Arc::new(15));
        cache.insert((2, 3), Arc::new(23));
        assert_eq!(cache.lower_bound(&(1, 0)).map(|(k, _)| k), Some((1, 5)));
        assert_eq!(cache.lower_bound(&(1, 6)).map(|(k, _)| k), Some((2, 3)));
        assert!(cache.lower_bound(&(3, 0)).is_none());
    }

    /// Unreferenced entries expire after the delay; referenced ones stay fresh.
    #[test]
    fn test_expiry() {
        let cache = ObjectCache::<u32, u32>::new();
        let held = cache.insert(1, Arc::new(1));
        cache.insert(2, Arc::new(2));

        cache.update_timestamps(3.0);
        assert_eq!(cache.remove_expired(5.0), 0);

        cache.update_timestamps(6.0);
        assert_eq!(cache.remove_expired(5.0), 1);
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));

        drop(held);
        cache.update_timestamps(30.0);
        assert_eq!(cache.remove_expired(5.0), 1);
        assert!(cache.is_empty());
    }

    /// Entries inserted late are stamped with the latest reference time.
    #[test]
    fn test_new_entries_use_reference_time() {
        let cache = ObjectCache::<u32, u32>::new();
        cache.update_timestamps(100.0);
        cache.insert(7, Arc::new(7));
        cache.update_timestamps(103.0);
        assert_eq!(cache.remove_expired(5.0), 0);
        cache.update_timestamps(106.0);
        assert_eq!(cache.remove_expired(5.0), 1);
    }

    #[test]
    fn test_for_each_and_clear() {
        let cache = ObjectCache::<u32, u32>::new();
        for i in 0..4 {
            cache.insert(i, Arc::new(i * 10));
        }
        let mut sum = 0;
        cache.for_each(|_, v| sum += **v);
        assert_eq!(sum, 60);
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
