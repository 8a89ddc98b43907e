//! Cache-aside wrapper for arbitrary async fetch functions.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use wayfinder_core::{CacheEngine, CacheKeySource};

/// Wrap `inner` so calls consult `cache` first.
///
/// On a miss `inner` runs and a successful value is stored under the
/// argument's canonical key with `ttl` (`None` uses the namespace default).
/// Errors are returned untouched and never cached.
///
/// ```ignore
/// let rates = with_cache(cache, "currency", None, |code: String| fetch_rates(code));
/// let eur = rates.call("EUR".to_string()).await?;
/// ```
pub fn with_cache<V, F>(
    cache: Arc<CacheEngine<V>>,
    namespace: impl Into<String>,
    ttl: Option<Duration>,
    inner: F,
) -> CachedFetch<V, F> {
    CachedFetch {
        cache,
        namespace: namespace.into(),
        ttl,
        inner,
    }
}

/// A fetch function fronted by a cache namespace.
pub struct CachedFetch<V, F> {
    cache: Arc<CacheEngine<V>>,
    namespace: String,
    ttl: Option<Duration>,
    inner: F,
}

impl<V: Clone, F> CachedFetch<V, F> {
    pub async fn call<A, Fut, E>(&self, args: A) -> Result<V, E>
    where
        A: CacheKeySource,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let key = args.cache_key(None);
        if let Some(hit) = self.cache.get(&self.namespace, &key) {
            tracing::trace!(namespace = %self.namespace, key = %key, "cache hit");
            return Ok(hit);
        }

        let value = (self.inner)(args).await?;
        if let Err(err) = self
            .cache
            .set(&self.namespace, key, value.clone(), self.ttl)
        {
            tracing::warn!(namespace = %self.namespace, error = %err, "failed to cache value");
        }
        Ok(value)
    }

    /// Drop the cached value for `args`, forcing the next call through.
    pub fn invalidate<A: CacheKeySource>(&self, args: &A) -> bool {
        self.cache.remove(&self.namespace, &args.cache_key(None))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}
