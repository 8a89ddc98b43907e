//! Live tier fetchers.
//!
//! A [`TierFetcher`] is what the fallback chain calls for tiers 1 to 3.
//! Three shapes are provided:
//! - [`SingleSourceTier`]: one upstream (tier 1).
//! - [`ConcurrentTier`]: several independent upstreams queried at once;
//!   partial successes are merged (tier 2).
//! - [`ScrapeTier`]: a URL scraped through the credit-limited pool (tier 3).
//!
//! Every fetch receives the tier's time budget and enforces it itself. A
//! fan-out tier caps each sub-source at that budget rather than bounding the
//! whole gather, so a hung source can never discard a sibling's data.

use async_trait::async_trait;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use wayfinder_core::{ErrorKind, Payload, ProviderError, TripQuery};

use crate::providers::{ScrapeFormat, ScrapePool, SubSource};

/// Data produced by one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub data: T,

    /// Sub-sources that contributed to `data`
    pub corroborating: usize,
}

impl<T> Fetched<T> {
    pub fn single(data: T) -> Self {
        Self {
            data,
            corroborating: 1,
        }
    }
}

/// One live tier of the fallback chain.
#[async_trait]
pub trait TierFetcher<T>: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch for `query`, finishing within `limit`.
    async fn fetch(&self, query: &TripQuery, limit: Duration) -> Result<Fetched<T>, ProviderError>;
}

/// Call `source` bounded by the smaller of its own timeout and `cap`.
async fn fetch_bounded<T>(
    source: &dyn SubSource<T>,
    query: &TripQuery,
    cap: Duration,
) -> Result<T, ProviderError> {
    let limit = source.timeout().min(cap);
    match tokio::time::timeout(limit, source.fetch(query)).await {
        Ok(result) => result.map_err(|e| e.with_provider(source.name().to_string())),
        Err(_) => Err(ProviderError::timeout(limit).with_provider(source.name().to_string())),
    }
}

/// A tier backed by exactly one source.
pub struct SingleSourceTier<T> {
    source: Arc<dyn SubSource<T>>,
}

impl<T> SingleSourceTier<T> {
    pub fn new(source: Arc<dyn SubSource<T>>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<T: Send + 'static> TierFetcher<T> for SingleSourceTier<T> {
    fn name(&self) -> &str {
        self.source.name()
    }

    async fn fetch(&self, query: &TripQuery, limit: Duration) -> Result<Fetched<T>, ProviderError> {
        fetch_bounded(self.source.as_ref(), query, limit)
            .await
            .map(Fetched::single)
    }
}

/// A tier that queries independent sources concurrently.
///
/// Every source runs to completion or to its own timeout, capped at the
/// tier budget; one failure never cancels a sibling. Successes are merged in
/// source order.
pub struct ConcurrentTier<T> {
    name: String,
    sources: Vec<Arc<dyn SubSource<T>>>,
}

impl<T: Payload> ConcurrentTier<T> {
    pub fn new(name: impl Into<String>, sources: Vec<Arc<dyn SubSource<T>>>) -> Self {
        Self {
            name: name.into(),
            sources,
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl<T: Payload> TierFetcher<T> for ConcurrentTier<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, query: &TripQuery, limit: Duration) -> Result<Fetched<T>, ProviderError> {
        if self.sources.is_empty() {
            return Err(ProviderError::no_data(format!("{} has no sources", self.name)));
        }

        let results = join_all(
            self.sources
                .iter()
                .map(|source| fetch_bounded(source.as_ref(), query, limit)),
        )
        .await;

        let mut merged: Option<T> = None;
        let mut corroborating = 0;
        let mut errors = Vec::new();

        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(data) => {
                    corroborating += 1;
                    match merged.as_mut() {
                        Some(acc) => acc.merge(data),
                        None => merged = Some(data),
                    }
                }
                Err(err) => {
                    tracing::debug!(
                        tier = %self.name,
                        source = source.name(),
                        kind = %err.kind,
                        "sub-source failed"
                    );
                    errors.push(err);
                }
            }
        }

        if let Some(data) = merged {
            return Ok(Fetched {
                data,
                corroborating,
            });
        }

        // Retry the whole tier only if some source might recover.
        let summary = errors
            .iter()
            .map(|e| format!("{}: {}", e.provider.as_deref().unwrap_or("?"), e.kind))
            .collect::<Vec<_>>()
            .join(", ");
        let kind = errors
            .iter()
            .map(|e| e.kind)
            .find(|k| k.is_retryable())
            .unwrap_or(ErrorKind::NoDataFound);

        Err(ProviderError::new(
            kind,
            format!("all {} sources failed ({})", self.sources.len(), summary),
        ))
    }
}

type UrlFor = dyn Fn(&TripQuery) -> String + Send + Sync;

/// A tier that scrapes a query-derived URL through a [`ScrapePool`].
///
/// The scraped `data` is deserialized into `T`.
pub struct ScrapeTier<T> {
    name: String,
    pool: Arc<ScrapePool>,
    format: ScrapeFormat,
    url_for: Box<UrlFor>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> ScrapeTier<T> {
    pub fn new<F>(
        name: impl Into<String>,
        pool: Arc<ScrapePool>,
        format: ScrapeFormat,
        url_for: F,
    ) -> Self
    where
        F: Fn(&TripQuery) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            pool,
            format,
            url_for: Box::new(url_for),
            _payload: PhantomData,
        }
    }

    pub fn pool(&self) -> &Arc<ScrapePool> {
        &self.pool
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> TierFetcher<T> for ScrapeTier<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, query: &TripQuery, limit: Duration) -> Result<Fetched<T>, ProviderError> {
        let url = (self.url_for)(query);
        let scrape = match tokio::time::timeout(limit, self.pool.scrape(&url, self.format)).await {
            Ok(scrape) => scrape?,
            Err(_) => return Err(ProviderError::timeout(limit).with_provider(self.name.clone())),
        };

        let data = serde_json::from_value(scrape.output.data)
            .map_err(|e| ProviderError::from(e).with_provider(scrape.provider))?;
        Ok(Fetched::single(data))
    }
}
