use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use lru::LruCache;
use tokio::sync::Mutex;

pub(crate) trait KeyType: Clone + fmt::Debug + Hash + Eq + Send + Sync {}
pub(crate) trait ValueType: Clone + Send + Sync {}

// Blanket implementation which satisfies the compiler
impl<K> KeyType for K where K: Clone + fmt::Debug + Hash + Eq + Send + Sync {}

// Blanket implementation which satisfies the compiler
impl<V> ValueType for V where V: Clone + Send + Sync {}

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Capacity-bounded in-memory storage.
///
/// Evicts the least recently used entry once full. Entries inserted with a time to live
/// are dropped lazily, on the first lookup after they expire.
#[derive(Clone)]
pub(crate) struct CacheStorage<K: KeyType, V: ValueType> {
    caller: &'static str,
    inner: Arc<Mutex<LruCache<K, Entry<V>>>>,
}

impl<K, V> CacheStorage<K, V>
where
    K: KeyType,
    V: ValueType,
{
    pub(crate) fn new(max_capacity: NonZeroUsize, caller: &'static str) -> Self {
        Self {
            caller,
            inner: Arc::new(Mutex::new(LruCache::new(max_capacity))),
        }
    }

    pub(crate) async fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        match guard.get(key) {
            Some(entry) if entry.is_expired(now) => {
                guard.pop(key);
                tracing::trace!(cache = self.caller, ?key, "expired entry evicted");
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    pub(crate) async fn insert(&self, key: K, value: V) {
        self.put(key, value, None).await
    }

    pub(crate) async fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.put(key, value, Instant::now().checked_add(ttl)).await
    }

    async fn put(&self, key: K, value: V, expires_at: Option<Instant>) {
        let mut guard = self.inner.lock().await;
        if let Some((evicted, _)) = guard.push(key, Entry { value, expires_at }) {
            tracing::trace!(cache = self.caller, key = ?evicted, "entry evicted");
        }
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
