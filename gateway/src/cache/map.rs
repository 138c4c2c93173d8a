use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{Arc, Weak},
    time::Duration,
};

use futures::{FutureExt as _, TryFutureExt as _};
use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::Instant};
use tracing::trace;

use super::{CacheError, SharedResult};

#[derive(Clone, Copy, Debug)]
pub struct CachedMapConfig {
    /// How long successes are kept.
    pub ttl: Duration,
    /// How long failures are kept. Zero disables caching them.
    pub error_ttl: Duration,
    /// Once settled entries exceed this, the oldest are evicted in one batch
    /// until half of it remains.
    pub max_cached: usize,
    /// Expiries this close together share one timer wake up.
    pub slop: Duration,
}

impl Default for CachedMapConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            error_ttl: Duration::from_secs(5),
            max_cached: 10_000,
            slop: Duration::from_millis(50),
        }
    }
}

/// What [`CachedMap::lookup`] found.
pub enum CacheLookup<V> {
    Pending(SharedResult<V>),
    Settled(Result<V, CacheError>),
    Absent,
}

struct Settled<V> {
    value: Result<V, CacheError>,
    exp: Instant,
}

struct Pending<V> {
    id: u64,
    fut: SharedResult<V>,
}

struct Inner<K, V> {
    cached: HashMap<K, Settled<V>>,
    pending: HashMap<K, Pending<V>>,
    next_id: u64,
    timer: Option<(Instant, JoinHandle<()>)>,
}

/// A keyed cache with at most one computation in flight per key.
///
/// Producers are spawned, so they run to completion even when every caller
/// gives up on them.
pub struct CachedMap<K, V> {
    config: CachedMapConfig,
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K, V> std::fmt::Debug for CachedMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CachedMap")
            .field("config", &self.config)
            .field("cached", &inner.cached.len())
            .field("pending", &inner.pending.len())
            .finish()
    }
}

impl<K, V> Drop for CachedMap<K, V> {
    fn drop(&mut self) {
        if let Some((_, timer)) = self.inner.lock().timer.take() {
            timer.abort();
        }
    }
}

impl<K, V> CachedMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CachedMapConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                cached: HashMap::new(),
                pending: HashMap::new(),
                next_id: 0,
                timer: None,
            })),
        }
    }

    /// Returns the cached value of `key`, joins its pending computation, or
    /// starts one with `producer`.
    pub async fn get<F, Fut>(&self, key: K, producer: F) -> Result<V, CacheError>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let fut = {
            let mut inner = self.inner.lock();
            let now = Instant::now();

            match inner.cached.get(&key) {
                Some(settled) if settled.exp > now => return settled.value.clone(),
                Some(_) => {
                    inner.cached.remove(&key);
                }
                None => {}
            }

            match inner.pending.get(&key) {
                Some(pending) => pending.fut.clone(),
                None => {
                    let id = inner.next_id;
                    inner.next_id += 1;

                    let fut = producer(key.clone())
                        .map_err(CacheError::from)
                        .boxed()
                        .shared();
                    inner.pending.insert(
                        key.clone(),
                        Pending {
                            id,
                            fut: fut.clone(),
                        },
                    );
                    self.settle_when_done(key, id, fut.clone());
                    fut
                }
            }
        };
        fut.await
    }

    pub fn lookup(&self, key: &K) -> CacheLookup<V> {
        let inner = self.inner.lock();
        if let Some(pending) = inner.pending.get(key) {
            return CacheLookup::Pending(pending.fut.clone());
        }
        match inner.cached.get(key) {
            Some(settled) if settled.exp > Instant::now() => {
                CacheLookup::Settled(settled.value.clone())
            }
            _ => CacheLookup::Absent,
        }
    }

    /// Stores `value`, replacing whatever `key` held.
    pub fn set(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        inner.pending.remove(&key);
        let exp = Instant::now() + self.config.ttl;
        inner.cached.insert(
            key,
            Settled {
                value: Ok(value),
                exp,
            },
        );
        self.after_insert(&mut inner, exp);
    }

    pub fn delete(&self, key: &K) {
        let mut inner = self.inner.lock();
        inner.pending.remove(key);
        inner.cached.remove(key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.cached.clear();
        if let Some((_, timer)) = inner.timer.take() {
            timer.abort();
        }
    }

    /// Number of settled entries, expired ones included until the timer
    /// removes them.
    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.inner.lock().cached.len()
    }

    fn settle_when_done(&self, key: K, id: u64, fut: SharedResult<V>) {
        let inner = Arc::downgrade(&self.inner);
        let config = self.config;
        tokio::spawn(async move {
            let value = fut.await;
            let Some(inner) = inner.upgrade() else {
                return;
            };

            let mut guard = inner.lock();
            if guard.pending.get(&key).map(|p| p.id) != Some(id) {
                // Deleted or replaced while in flight.
                return;
            }
            guard.pending.remove(&key);

            let ttl = match value {
                Ok(_) => config.ttl,
                Err(_) => config.error_ttl,
            };
            if ttl.is_zero() {
                return;
            }

            let exp = Instant::now() + ttl;
            guard.cached.insert(key, Settled { value, exp });
            after_insert(&inner, &mut guard, &config, exp);
        });
    }

    fn after_insert(&self, inner: &mut Inner<K, V>, exp: Instant) {
        after_insert(&self.inner, inner, &self.config, exp);
    }
}

fn after_insert<K, V>(
    this: &Arc<Mutex<Inner<K, V>>>,
    inner: &mut Inner<K, V>,
    config: &CachedMapConfig,
    exp: Instant,
) where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    evict_oldest(inner, config.max_cached);
    schedule(this, inner, config, exp + config.slop);
}

/// Once more than `max` entries are settled, drops the ones closest to
/// expiry until `max / 2` remain.
fn evict_oldest<K: Hash + Eq + Clone, V>(inner: &mut Inner<K, V>, max: usize) {
    if inner.cached.len() <= max {
        return;
    }
    let excess = inner.cached.len() - max / 2;

    let mut by_exp: Vec<(Instant, K)> = inner
        .cached
        .iter()
        .map(|(k, s)| (s.exp, k.clone()))
        .collect();
    by_exp.sort_unstable_by_key(|(exp, _)| *exp);
    for (_, key) in by_exp.into_iter().take(excess) {
        inner.cached.remove(&key);
    }
    trace!(evicted = excess, "cache over capacity");
}

fn schedule<K, V>(
    this: &Arc<Mutex<Inner<K, V>>>,
    inner: &mut Inner<K, V>,
    config: &CachedMapConfig,
    at: Instant,
) where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    if let Some((current, _)) = &inner.timer {
        if *current <= at {
            return;
        }
    }
    // Without a runtime expired entries are only dropped by lookups.
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    if let Some((_, timer)) = inner.timer.take() {
        timer.abort();
    }

    let weak: Weak<Mutex<Inner<K, V>>> = Arc::downgrade(this);
    let config = *config;
    let timer = handle.spawn(async move {
        tokio::time::sleep_until(at).await;
        let Some(this) = weak.upgrade() else {
            return;
        };

        let mut inner = this.lock();
        inner.timer = None;
        let now = Instant::now();
        inner.cached.retain(|_, s| s.exp > now);
        if let Some(next) = inner.cached.values().map(|s| s.exp).min() {
            schedule(&this, &mut inner, &config, next + config.slop);
        }
    });
    inner.timer = Some((at, timer));
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;

    use super::*;

    fn config() -> CachedMapConfig {
        CachedMapConfig {
            ttl: Duration::from_secs(10),
            error_ttl: Duration::from_secs(1),
            max_cached: 4,
            slop: Duration::from_millis(10),
        }
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_gets_share_one_producer() {
        let cache = CachedMap::<u32, u32>::new(config());
        let calls = Arc::new(AtomicUsize::new(0));

        let gets = (0..10).map(|_| {
            let calls = calls.clone();
            cache.get(7, move |k| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                anyhow::Ok(k * 2)
            })
        });
        let results = futures::future::join_all(gets).await;

        assert!(results.iter().all(|r| matches!(r, Ok(14))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_distinguishes_states() {
        let cache = Arc::new(CachedMap::<u32, u32>::new(config()));
        assert!(matches!(cache.lookup(&1), CacheLookup::Absent));

        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get(1, |_| async move { anyhow::Ok(rx.await?) })
                    .await
            })
        };
        settle().await;
        assert!(matches!(cache.lookup(&1), CacheLookup::Pending(_)));

        tx.send(5).unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), 5);
        settle().await;
        assert!(matches!(cache.lookup(&1), CacheLookup::Settled(Ok(5))));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_through_the_timer() {
        let cache = CachedMap::<u32, u32>::new(config());
        cache.set(1, 10);
        cache.get(2, |_| async { anyhow::Ok(20) }).await.unwrap();
        settle().await;
        assert_eq!(cache.cached_len(), 2);

        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;
        assert_eq!(cache.cached_len(), 0);
        assert!(matches!(cache.lookup(&1), CacheLookup::Absent));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_cached_briefly() {
        let cache = CachedMap::<u32, u32>::new(config());
        let calls = Arc::new(AtomicUsize::new(0));
        let producer = |calls: Arc<AtomicUsize>| {
            move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(anyhow!("rpc down"))
            }
        };

        let err = cache.get(3, producer(calls.clone())).await.unwrap_err();
        assert_eq!(err.to_string(), "rpc down");
        settle().await;
        assert!(cache.get(3, producer(calls.clone())).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.get(3, producer(calls.clone())).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn oldest_entries_are_evicted_first() {
        let cache = CachedMap::<u32, u32>::new(config());
        for k in 0..4 {
            cache.set(k, k);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(cache.cached_len(), 4);

        // Going over the limit drops the oldest half in one go.
        cache.set(4, 4);
        assert_eq!(cache.cached_len(), 2);
        for k in 0..3 {
            assert!(matches!(cache.lookup(&k), CacheLookup::Absent));
        }
        assert!(matches!(cache.lookup(&3), CacheLookup::Settled(Ok(3))));
        assert!(matches!(cache.lookup(&4), CacheLookup::Settled(Ok(4))));

        cache.set(5, 5);
        assert_eq!(cache.cached_len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_is_amortised_over_inserts() {
        let cache = CachedMap::<u32, u32>::new(CachedMapConfig {
            max_cached: 100,
            ..config()
        });
        for k in 0..101 {
            cache.set(k, k);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(cache.cached_len(), 50);
        assert!(matches!(cache.lookup(&50), CacheLookup::Absent));
        assert!(matches!(cache.lookup(&51), CacheLookup::Settled(Ok(51))));

        // The next 50 inserts fit without evicting anything.
        for k in 101..151 {
            cache.set(k, k);
        }
        assert_eq!(cache.cached_len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_keys_ignore_late_results() {
        let cache = Arc::new(CachedMap::<u32, u32>::new(config()));
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get(9, |_| async move { anyhow::Ok(rx.await?) })
                    .await
            })
        };
        settle().await;

        cache.delete(&9);
        tx.send(1).unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), 1);
        settle().await;
        assert!(matches!(cache.lookup(&9), CacheLookup::Absent));
    }
}
