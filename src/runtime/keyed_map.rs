use dashmap::DashMap;
use dashmap::mapref::one::Ref;
use std::hash::Hash;

/// Lock-free concurrent map with load-or-store semantics: concurrent readers
/// never block each other, and when two writers race to insert the same key
/// only one of them wins — the loser gets back the winner's value instead of
/// clobbering it.
pub struct KeyedMap<K, V> {
    inner: DashMap<K, V>,
}

impl<K, V> KeyedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<Ref<'_, K, V>>
    where
        V: Clone,
    {
        self.inner.get(key)
    }

    pub fn get_cloned(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.get(key).map(|entry| entry.value().clone())
    }

    /// Returns the existing value for `key`, or inserts `make()`'s result if
    /// absent. Only one concurrent caller's `make()` result is kept.
    pub fn get_or_insert_with<F>(&self, key: K, make: F) -> V
    where
        V: Clone,
        F: FnOnce() -> V,
    {
        self.inner
            .entry(key)
            .or_insert_with(make)
            .value()
            .clone()
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<(K, V)> {
        self.inner.remove(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn retain<F>(&self, predicate: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        self.inner.retain(predicate);
    }

    pub fn iter(&self) -> dashmap::iter::Iter<'_, K, V> {
        self.inner.iter()
    }
}

impl<K, V> Default for KeyedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_insert_with_only_applies_once_per_key() {
        let map: KeyedMap<String, u32> = KeyedMap::new();
        let first = map.get_or_insert_with("a".to_string(), || 1);
        let second = map.get_or_insert_with("a".to_string(), || 2);
        assert_eq!(first, 1);
        assert_eq!(second, 1);
    }

    #[test]
    fn remove_returns_key_and_value() {
        let map: KeyedMap<String, u32> = KeyedMap::new();
        map.insert("a".to_string(), 7);
        let (k, v) = map.remove(&"a".to_string()).unwrap();
        assert_eq!(k, "a");
        assert_eq!(v, 7);
        assert!(!map.contains_key(&"a".to_string()));
    }
}
