use std::{future::Future, sync::Arc, time::Duration};

use futures::{future::BoxFuture, FutureExt as _, TryFutureExt as _};
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{CacheError, SharedResult};

type Producer<T> = dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync;

struct Slot<T> {
    id: u64,
    fut: SharedResult<T>,
    // None until the value settles.
    exp: Option<Instant>,
}

struct State<T> {
    slot: Option<Slot<T>>,
    next_id: u64,
}

/// A single lazily produced value.
///
/// Concurrent [`get`](Self::get)s share one call of the producer. Successes
/// are kept for `ttl`, failures for `error_ttl`.
pub struct CachedValue<T> {
    producer: Box<Producer<T>>,
    ttl: Duration,
    error_ttl: Duration,
    state: Arc<Mutex<State<T>>>,
}

impl<T> std::fmt::Debug for CachedValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedValue")
            .field("ttl", &self.ttl)
            .field("error_ttl", &self.error_ttl)
            .finish_non_exhaustive()
    }
}

impl<T> CachedValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(producer: F, ttl: Duration, error_ttl: Duration) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            producer: Box::new(move || producer().boxed()),
            ttl,
            error_ttl,
            state: Arc::new(Mutex::new(State {
                slot: None,
                next_id: 0,
            })),
        }
    }

    pub async fn get(&self) -> Result<T, CacheError> {
        let fut = {
            let mut state = self.state.lock();
            let now = Instant::now();
            match &state.slot {
                Some(slot) if slot.exp.map_or(true, |exp| exp > now) => slot.fut.clone(),
                _ => {
                    let id = state.next_id;
                    state.next_id += 1;

                    let fut = (self.producer)().map_err(CacheError::from).boxed().shared();
                    state.slot = Some(Slot {
                        id,
                        fut: fut.clone(),
                        exp: None,
                    });
                    self.settle_when_done(id, fut.clone());
                    fut
                }
            }
        };
        fut.await
    }

    /// The settled value, if any and not expired.
    pub fn peek(&self) -> Option<Result<T, CacheError>> {
        let state = self.state.lock();
        let slot = state.slot.as_ref()?;
        match slot.exp {
            Some(exp) if exp > Instant::now() => slot.fut.peek().cloned(),
            _ => None,
        }
    }

    /// Replaces the value, dropping any computation in flight.
    pub fn set(&self, value: T) {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.slot = Some(Slot {
            id,
            fut: futures::future::ready(Ok(value)).boxed().shared(),
            exp: Some(Instant::now() + self.ttl),
        });
    }

    pub fn clear(&self) {
        self.state.lock().slot = None;
    }

    fn settle_when_done(&self, id: u64, fut: SharedResult<T>) {
        let state = Arc::downgrade(&self.state);
        let (ttl, error_ttl) = (self.ttl, self.error_ttl);
        tokio::spawn(async move {
            let ttl = match fut.await {
                Ok(_) => ttl,
                Err(_) => error_ttl,
            };
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = state.lock();
            if let Some(slot) = state.slot.as_mut().filter(|s| s.id == id) {
                slot.exp = Some(Instant::now() + ttl);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;

    use super::*;

    fn counting(
        calls: &Arc<AtomicUsize>,
        fail: bool,
    ) -> impl Fn() -> BoxFuture<'static, anyhow::Result<usize>> + Send + Sync + 'static {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                match fail {
                    true => Err(anyhow!("failure {n}")),
                    false => Ok(n),
                }
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_gets_share_one_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CachedValue::new(
            counting(&calls, false),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );

        let results = futures::future::join_all((0..8).map(|_| cache.get())).await;
        assert!(results.iter().all(|r| matches!(r, Ok(1))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_their_ttl() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CachedValue::new(
            counting(&calls, false),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );

        assert_eq!(cache.get().await.unwrap(), 1);
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.get().await.unwrap(), 1);
        assert_eq!(cache.peek().unwrap().unwrap(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.peek().is_none());
        assert_eq!(cache.get().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_use_their_own_ttl() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CachedValue::new(
            counting(&calls, true),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );

        let err = cache.get().await.unwrap_err();
        assert_eq!(err.to_string(), "failure 1");
        tokio::task::yield_now().await;
        assert!(cache.get().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get().await.unwrap_err().to_string(), "failure 2");
    }

    #[tokio::test(start_paused = true)]
    async fn set_and_clear() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CachedValue::new(
            counting(&calls, false),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );

        cache.set(41);
        assert_eq!(cache.get().await.unwrap(), 41);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        cache.clear();
        assert_eq!(cache.get().await.unwrap(), 1);
    }
}
