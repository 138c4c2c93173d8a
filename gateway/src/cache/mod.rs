//! Async caches that share in-flight work between concurrent callers.
//!
//! - [`CachedValue`]: a single value with separate success and failure TTLs.
//! - [`CachedMap`]: keyed TTL cache, bounded, with one expiry timer.
//! - [`LruMap`]: bounded most recently used map whose pending values only
//!   land if they are still current when they resolve.

use std::sync::Arc;

use futures::future::{BoxFuture, Shared};

mod lru;
mod map;
mod value;

pub use self::lru::{LruMap, LruValue};
pub use self::map::{CacheLookup, CachedMap, CachedMapConfig};
pub use self::value::CachedValue;

/// A failure shared by every waiter of the same computation.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{0:#}")]
pub struct CacheError(pub Arc<anyhow::Error>);

impl From<anyhow::Error> for CacheError {
    fn from(e: anyhow::Error) -> Self {
        Self(Arc::new(e))
    }
}

pub type SharedResult<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;
