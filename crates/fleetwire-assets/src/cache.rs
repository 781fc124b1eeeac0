//! Metered cache.
//!
//! Every `get` counts as a request; a present entry also counts as a hit.
//! `put`, `remove` and `clear` leave the counters alone. Counters live as
//! long as the cache; replacing the cache resets them.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter snapshot of one cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub name: String,
    pub element_count: usize,
    pub request_count: u64,
    pub hit_count: u64,
}

pub struct Cache<K, V> {
    name: String,
    entries: DashMap<K, V>,
    requests: AtomicU64,
    hits: AtomicU64,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let value = self.entries.get(key).map(|entry| entry.value().clone());
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
        value
    }

    pub fn put(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn element_count(&self) -> usize {
        self.entries.len()
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CacheStats {
        // hits first: a hit is always counted after its request
        let hit_count = self.hit_count();
        let request_count = self.request_count();
        CacheStats {
            name: self.name.clone(),
            element_count: self.element_count(),
            request_count,
            hit_count,
        }
    }
}

impl<K: Eq + Hash, V> std::fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("elements", &self.entries.len())
            .field("requests", &self.requests.load(Ordering::Relaxed))
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters() {
        let cache: Cache<String, u32> = Cache::new("people");
        assert_eq!(cache.get("a"), None);
        cache.put("a".to_string(), 1);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);

        assert_eq!(cache.request_count(), 3);
        assert_eq!(cache.hit_count(), 1);

        cache.remove("a");
        cache.put("c".to_string(), 3);
        cache.clear();
        assert_eq!(cache.request_count(), 3);
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.element_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_gets_keep_invariant() {
        let cache: Arc<Cache<u32, u32>> = Arc::new(Cache::new("numbers"));
        for i in 0..10 {
            cache.put(i, i);
        }

        let mut handles = Vec::new();
        for t in 0..8u32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100u32 {
                    cache.get(&((i + t) % 20));
                    let stats = cache.stats();
                    assert!(stats.hit_count <= stats.request_count);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = cache.stats();
        assert_eq!(stats.request_count, 800);
        assert_eq!(stats.hit_count, 400);
        assert_eq!(stats.element_count, 10);
    }
}
