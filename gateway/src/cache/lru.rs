use std::{
    future::Future,
    hash::Hash,
    num::NonZeroUsize,
    sync::{Arc, Weak},
};

use futures::FutureExt as _;
use parking_lot::Mutex;

use super::{CacheError, SharedResult};

enum Entry<V> {
    Ready(V),
    Pending { id: u64, fut: SharedResult<V> },
}

/// A value held by an [`LruMap`].
#[derive(Clone)]
pub enum LruValue<V> {
    Ready(V),
    Pending(SharedResult<V>),
}

impl<V: Clone> LruValue<V> {
    pub async fn get(self) -> Result<V, CacheError> {
        match self {
            LruValue::Ready(v) => Ok(v),
            LruValue::Pending(fut) => fut.await,
        }
    }
}

struct Inner<K: Hash + Eq, V> {
    cache: lru::LruCache<K, Entry<V>>,
    next_id: u64,
}

/// A bounded map that evicts the least recently used entry.
///
/// Entries may be pending. A pending entry becomes ready, and most recently
/// used, when its future succeeds. It is removed when the future fails. Both
/// only happen if the entry was not replaced or evicted in the meantime.
pub struct LruMap<K: Hash + Eq, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K: Hash + Eq, V> std::fmt::Debug for LruMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LruMap")
            .field("len", &inner.cache.len())
            .field("cap", &inner.cache.cap())
            .finish()
    }
}

impl<K, V> LruMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                cache: lru::LruCache::new(capacity),
                next_id: 0,
            })),
        }
    }

    /// Returns the value and marks it most recently used.
    pub fn touch(&self, key: &K) -> Option<LruValue<V>> {
        self.inner.lock().cache.get(key).map(Entry::to_value)
    }

    /// Returns the value without changing its recency.
    pub fn peek(&self, key: &K) -> Option<LruValue<V>> {
        self.inner.lock().cache.peek(key).map(Entry::to_value)
    }

    pub fn set(&self, key: K, value: V) {
        self.inner.lock().cache.put(key, Entry::Ready(value));
    }

    /// Stores a pending value. The returned future must be polled for the
    /// entry to ever settle; it is not spawned.
    pub fn set_pending<F>(&self, key: K, fut: F) -> SharedResult<V>
    where
        F: Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        self.insert_pending(&mut inner, key, fut)
    }

    /// [`touch`](Self::touch)es `key`, or stores the pending value `make`
    /// produces when `key` is missing.
    pub fn touch_or_set_pending<F, Fut>(&self, key: K, make: F) -> LruValue<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.cache.get(&key) {
            return entry.to_value();
        }
        LruValue::Pending(self.insert_pending(&mut inner, key, make()))
    }

    pub fn delete(&self, key: &K) {
        self.inner.lock().cache.pop(key);
    }

    pub fn clear(&self) {
        self.inner.lock().cache.clear();
    }

    /// Keys from most to least recently used.
    #[cfg(test)]
    fn keys(&self) -> Vec<K> {
        self.inner
            .lock()
            .cache
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_pending<F>(&self, inner: &mut Inner<K, V>, key: K, fut: F) -> SharedResult<V>
    where
        F: Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        let id = inner.next_id;
        inner.next_id += 1;

        let this = Arc::downgrade(&self.inner);
        let settle_key = key.clone();
        let fut = async move {
            let value = fut.await;
            settle(&this, &settle_key, id, &value);
            value
        }
        .boxed()
        .shared();

        inner.cache.put(
            key,
            Entry::Pending {
                id,
                fut: fut.clone(),
            },
        );
        fut
    }
}

fn settle<K, V>(this: &Weak<Mutex<Inner<K, V>>>, key: &K, id: u64, value: &Result<V, CacheError>)
where
    K: Hash + Eq,
    V: Clone,
{
    let Some(this) = this.upgrade() else {
        return;
    };
    let mut inner = this.lock();

    let current = matches!(
        inner.cache.peek(key),
        Some(Entry::Pending { id: current, .. }) if *current == id
    );
    if !current {
        return;
    }

    match value {
        Ok(v) => {
            if let Some(entry) = inner.cache.get_mut(key) {
                *entry = Entry::Ready(v.clone());
            }
        }
        Err(_) => {
            inner.cache.pop(key);
        }
    }
}

impl<V: Clone> Entry<V> {
    fn to_value(&self) -> LruValue<V> {
        match self {
            Entry::Ready(v) => LruValue::Ready(v.clone()),
            Entry::Pending { fut, .. } => LruValue::Pending(fut.clone()),
        }
    }
}
