use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::OnceCell;

/// A singleflight cache: concurrent lookups for the same key share one
/// in-flight initialization instead of racing duplicate work.
///
/// Keyed `DashMap<K, OnceCell<V>>` with a fallible async initializer, which
/// is what establishing an upstream session or fetching file metadata
/// actually needs. `DashMap::entry` only guards the insert itself; the
/// `OnceCell` stored behind it is what callers actually await, so a slow
/// initializer never holds the map's shard lock.
pub struct AwaitCache<K, V> {
    items: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K: Clone + Eq + Hash, V: Clone> AwaitCache<K, V> {
    pub fn new() -> Self {
        AwaitCache {
            items: DashMap::new(),
        }
    }

    /// Returns the cached value for `key`, running `init` to produce it if
    /// absent. If `init` fails, nothing is cached and the next caller gets
    /// a fresh attempt.
    pub async fn get_or_try_init<F, Fut>(&self, key: K, init: F) -> anyhow::Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let cell = match self.items.entry(key) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let cell = Arc::new(OnceCell::new());
                entry.insert(cell.clone());
                cell
            }
        };

        cell.get_or_try_init(init).await.cloned()
    }

    /// Removes the cached entry, returning its value if it had finished
    /// initializing (an in-flight initializer that hasn't completed yet
    /// yields `None`, same as a key that was never present).
    pub fn remove(&self, key: &K) -> Option<V> {
        self.items.remove(key).and_then(|(_, cell)| cell.get().cloned())
    }

    pub fn clear(&self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<K: Clone + Eq + Hash, V: Clone> Default for AwaitCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_lookups_init_once() {
        let cache: Arc<AwaitCache<&'static str, i32>> = Arc::new(AwaitCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_init("k", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok(42)
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_init_is_not_cached() {
        let cache: AwaitCache<&'static str, i32> = AwaitCache::new();

        let err = cache
            .get_or_try_init("k", || async { Err(anyhow::anyhow!("boom")) })
            .await;
        assert!(err.is_err());

        let ok = cache.get_or_try_init("k", || async { Ok(7) }).await.unwrap();
        assert_eq!(ok, 7);
    }

    #[tokio::test]
    async fn remove_forces_reinit() {
        let cache: AwaitCache<&'static str, i32> = AwaitCache::new();
        assert_eq!(cache.get_or_try_init("k", || async { Ok(1) }).await.unwrap(), 1);
        cache.remove(&"k");
        assert_eq!(cache.get_or_try_init("k", || async { Ok(2) }).await.unwrap(), 2);
    }
}
