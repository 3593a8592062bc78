//! Reader/writer-guarded containers.
//!
//! Small synchronization primitives used by the store internals: a guarded
//! value, a scoped lock for fallible critical sections, and a synchronized
//! map. Writers hold exclusive acquisition for their entire extent, so
//! readers never observe torn state.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError, RwLock};

/// A reader/writer-guarded value.
///
/// # Examples
///
/// ```
/// use rippledb::sync::Guarded;
///
/// let slot = Guarded::new(1);
/// slot.set(2);
/// slot.write(|value| *value += 1);
/// assert_eq!(slot.get(), 3);
/// ```
#[derive(Debug, Default)]
pub struct Guarded<T> {
    inner: RwLock<T>,
}

impl<T> Guarded<T> {
    /// Wraps a value.
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    /// Clones the contained value out under shared acquisition.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.read(Clone::clone)
    }

    /// Replaces the contained value under exclusive acquisition.
    pub fn set(&self, value: T) {
        self.write(|slot| *slot = value);
    }

    /// Runs `f` against the value under shared acquisition.
    /// `f` must not mutate through interior mutability.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Runs `f` against the value under exclusive acquisition.
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// A mutex that only exists to scope critical sections.
#[derive(Debug, Default)]
pub struct ScopedLock {
    inner: Mutex<()>,
}

impl ScopedLock {
    /// Creates an unlocked scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the fallible closure under exclusive acquisition.
    pub fn sync<R, E>(&self, f: impl FnOnce() -> Result<R, E>) -> Result<R, E> {
        let _guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}

/// A reader/writer-synchronized map.
///
/// # Examples
///
/// ```
/// use rippledb::sync::SyncMap;
///
/// let map = SyncMap::new();
/// map.insert("a", 1);
/// let (value, existed) = map.insert_if_absent("a", 2);
/// assert_eq!((value, existed), (1, true));
/// assert_eq!(map.remove(&"a"), Some(1));
/// ```
#[derive(Debug)]
pub struct SyncMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for SyncMap<K, V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V> SyncMap<K, V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.len()
    }

    /// Returns true when the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the value for the key, if present.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(key).cloned()
    }

    /// Returns an unsynchronized copy of the map.
    pub fn snapshot(&self) -> HashMap<K, V>
    where
        K: Clone,
        V: Clone,
    {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Inserts a value, returning the previously held one (if any).
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key, value)
    }

    /// Inserts the value only when the key is vacant. Returns the value now
    /// current for the key and whether an entry was already present.
    pub fn insert_if_absent(&self, key: K, value: V) -> (V, bool)
    where
        V: Clone,
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match guard.entry(key) {
            std::collections::hash_map::Entry::Occupied(entry) => (entry.get().clone(), true),
            std::collections::hash_map::Entry::Vacant(entry) => {
                (entry.insert(value).clone(), false)
            }
        }
    }

    /// Removes the key, returning the previously held value (if any).
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(key)
    }

    /// Visits every entry under shared acquisition.
    /// `f` must not call back into mutating operations on this map.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in guard.iter() {
            f(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_guarded_get_set() {
        let guarded = Guarded::new(1);
        assert_eq!(guarded.get(), 1);
        guarded.set(2);
        assert_eq!(guarded.get(), 2);
    }

    #[test]
    fn test_guarded_closures() {
        let guarded = Guarded::new(vec![1, 2]);
        let len = guarded.read(Vec::len);
        assert_eq!(len, 2);
        guarded.write(|v| v.push(3));
        assert_eq!(guarded.get(), vec![1, 2, 3]);
    }

    #[test]
    fn test_scoped_lock_propagates_result() {
        let lock = ScopedLock::new();
        let ok: Result<i32, &str> = lock.sync(|| Ok(5));
        assert_eq!(ok, Ok(5));
        let err: Result<i32, &str> = lock.sync(|| Err("nope"));
        assert_eq!(err, Err("nope"));
    }

    #[test]
    fn test_map_insert_get_remove() {
        let map = SyncMap::new();
        assert!(map.is_empty());
        assert_eq!(map.insert("a", 1), None);
        assert_eq!(map.insert("a", 2), Some(1));
        assert_eq!(map.get(&"a"), Some(2));
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove(&"a"), Some(2));
        assert_eq!(map.remove(&"a"), None);
    }

    #[test]
    fn test_map_insert_if_absent() {
        let map = SyncMap::new();
        let (value, present) = map.insert_if_absent("k", 10);
        assert_eq!((value, present), (10, false));
        let (value, present) = map.insert_if_absent("k", 20);
        assert_eq!((value, present), (10, true));
    }

    #[test]
    fn test_map_snapshot_and_for_each() {
        let map = SyncMap::new();
        map.insert("a", 1);
        map.insert("b", 2);
        let snapshot = map.snapshot();
        assert_eq!(snapshot.len(), 2);
        let mut total = 0;
        map.for_each(|_, v| total += v);
        assert_eq!(total, 3);
    }

    #[test]
    fn test_map_concurrent_inserts() {
        let map = Arc::new(SyncMap::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for j in 0..100 {
                        map.insert(i * 100 + j, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(map.len(), 800);
    }
}
