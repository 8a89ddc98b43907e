//! Fallback chain coordinator.
//!
//! A strict sequential state machine over the four tiers:
//!
//! 1. Tiers 1 to 3 are tried in ascending order, each through the retrying
//!    invoker. The first success is cached under the query's canonical key
//!    with that tier's TTL and returned.
//! 2. When every live tier failed, a cached entry for the key is returned as
//!    tier 4 / `cache`.
//! 3. Otherwise a placeholder is synthesized as tier 4 / `mock`.
//!
//! [`FallbackChain::get_data`] is total: failures are recorded in the result
//! and logged, never returned.

use std::sync::Arc;
use std::time::Duration;

use wayfinder_core::{
    CacheEngine, CacheError, CacheKeySource, ConfidenceBands, FallbackResult, Payload,
    RetryPolicy, SourceTag, Tier, TierFailure, TripQuery,
};

use crate::config::{RuntimeConfig, TiersConfig};
use crate::invoker::RetryInvoker;
use crate::tiers::TierFetcher;

struct LiveTier<T> {
    tier: Tier,
    fetcher: Arc<dyn TierFetcher<T>>,
    ttl: Duration,

    /// Budget for one attempt, enforced by the fetcher itself
    timeout: Duration,
    invoker: RetryInvoker,
}

/// Coordinates the four tiers for one cache namespace.
pub struct FallbackChain<T> {
    cache: Arc<CacheEngine<T>>,
    namespace: String,

    /// Configured live tiers in ascending order
    tiers: Vec<LiveTier<T>>,
    bands: ConfidenceBands,
}

impl<T: Payload> FallbackChain<T> {
    pub fn builder(
        cache: Arc<CacheEngine<T>>,
        namespace: impl Into<String>,
    ) -> FallbackChainBuilder<T> {
        FallbackChainBuilder {
            cache,
            namespace: namespace.into(),
            fetchers: Vec::new(),
            tiers: TiersConfig::default(),
            bands: ConfidenceBands::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn cache(&self) -> &Arc<CacheEngine<T>> {
        &self.cache
    }

    pub fn bands(&self) -> &ConfidenceBands {
        &self.bands
    }

    /// Live tiers that will be attempted, in order.
    pub fn live_tiers(&self) -> impl Iterator<Item = Tier> + '_ {
        self.tiers.iter().map(|t| t.tier)
    }

    /// Resolve `query`. Always returns a result.
    pub async fn get_data(&self, query: &TripQuery) -> FallbackResult<T> {
        let key = query.cache_key(None);
        let mut failures: Vec<TierFailure> = Vec::new();

        for live in &self.tiers {
            let source = live.fetcher.name();
            let invocation = live
                .invoker
                .invoke(source, || live.fetcher.fetch(query, live.timeout))
                .await;

            match invocation.outcome {
                Ok(fetched) => {
                    let stored = self.cache.set(
                        &self.namespace,
                        key.clone(),
                        fetched.data.clone(),
                        Some(live.ttl),
                    );
                    if let Err(err) = stored {
                        tracing::warn!(
                            namespace = %self.namespace,
                            error = %err,
                            "failed to cache tier result"
                        );
                    }

                    let confidence = self.bands.score(live.tier, fetched.corroborating);
                    tracing::info!(
                        tier = live.tier.rank(),
                        source,
                        attempts = invocation.attempts,
                        confidence,
                        "tier resolved"
                    );

                    let result = FallbackResult::new(
                        fetched.data,
                        live.tier.default_source(),
                        live.tier,
                        confidence,
                    );
                    return if live.tier > Tier::Primary {
                        result
                            .with_reason(higher_tiers_failed(&failures))
                            .with_failures(failures)
                    } else {
                        result
                    };
                }
                Err(err) => {
                    tracing::warn!(
                        tier = live.tier.rank(),
                        source,
                        kind = %err.kind,
                        attempts = invocation.attempts,
                        error = %err.message,
                        "tier failed, falling back"
                    );
                    failures.push(TierFailure::new(live.tier, source, &err, invocation.attempts));
                }
            }
        }

        if let Some(cached) = self.cache.get(&self.namespace, &key) {
            tracing::info!(
                namespace = %self.namespace,
                "serving cached data after live tiers failed"
            );
            return FallbackResult::new(cached, SourceTag::Cache, Tier::Fallback, self.bands.cache)
                .with_reason(format!("{}; served from cache", all_tiers_failed(&failures)))
                .with_failures(failures);
        }

        tracing::warn!(namespace = %self.namespace, "no live or cached data, serving placeholder");
        FallbackResult::new(
            T::placeholder(query),
            SourceTag::Mock,
            Tier::Fallback,
            self.bands.placeholder,
        )
        .with_reason(format!(
            "{} and no cached data; showing placeholder",
            all_tiers_failed(&failures)
        ))
        .with_failures(failures)
    }
}

fn describe(failures: &[TierFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn higher_tiers_failed(failures: &[TierFailure]) -> String {
    if failures.is_empty() {
        "higher-priority tiers failed".to_string()
    } else {
        format!("higher-priority tiers failed: {}", describe(failures))
    }
}

fn all_tiers_failed(failures: &[TierFailure]) -> String {
    if failures.is_empty() {
        "no live tiers configured".to_string()
    } else {
        format!("all live tiers failed ({})", describe(failures))
    }
}

/// Assembles a [`FallbackChain`].
pub struct FallbackChainBuilder<T> {
    cache: Arc<CacheEngine<T>>,
    namespace: String,
    fetchers: Vec<(Tier, Arc<dyn TierFetcher<T>>)>,
    tiers: TiersConfig,
    bands: ConfidenceBands,
    retry: RetryPolicy,
}

impl<T: Payload> FallbackChainBuilder<T> {
    /// Tier settings, confidence bands and retry policy from `config`.
    pub fn config(mut self, config: &RuntimeConfig) -> Self {
        self.tiers = config.tiers.clone();
        self.bands = config.confidence.clone();
        self.retry = config.retry.clone();
        self
    }

    pub fn primary(self, fetcher: Arc<dyn TierFetcher<T>>) -> Self {
        self.tier(Tier::Primary, fetcher)
    }

    pub fn aggregated(self, fetcher: Arc<dyn TierFetcher<T>>) -> Self {
        self.tier(Tier::Aggregated, fetcher)
    }

    pub fn scraped(self, fetcher: Arc<dyn TierFetcher<T>>) -> Self {
        self.tier(Tier::Scraped, fetcher)
    }

    /// Set the fetcher for a live tier, replacing any earlier one.
    /// [`Tier::Fallback`] is ignored; it never calls out.
    pub fn tier(mut self, tier: Tier, fetcher: Arc<dyn TierFetcher<T>>) -> Self {
        if tier == Tier::Fallback {
            tracing::warn!("ignoring fetcher registered for the fallback tier");
            return self;
        }
        self.fetchers.retain(|(t, _)| *t != tier);
        self.fetchers.push((tier, fetcher));
        self
    }

    pub fn tiers(mut self, tiers: TiersConfig) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn confidence(mut self, bands: ConfidenceBands) -> Self {
        self.bands = bands;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fails if the namespace is not configured in the cache.
    pub fn build(mut self) -> Result<FallbackChain<T>, CacheError> {
        if !self.cache.has_namespace(&self.namespace) {
            return Err(CacheError::UnknownNamespace(self.namespace));
        }

        self.fetchers.sort_by_key(|(tier, _)| *tier);
        let tiers = self
            .fetchers
            .into_iter()
            .filter_map(|(tier, fetcher)| {
                let settings = self.tiers.get(tier)?;
                Some(LiveTier {
                    tier,
                    fetcher,
                    ttl: settings.ttl,
                    timeout: settings.timeout,
                    invoker: RetryInvoker::new(self.retry.clone()),
                })
            })
            .collect();

        Ok(FallbackChain {
            cache: self.cache,
            namespace: self.namespace,
            tiers,
            bands: self.bands,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::Fetched;
    use async_trait::async_trait;
    use serde_json::{json, Value as JsonValue};
    use std::sync::atomic::{AtomicU32, Ordering};
    use wayfinder_core::{ErrorKind, NamespaceConfig, ProviderError};

    const NS: &str = "destination-intelligence";

    struct Stub {
        name: &'static str,
        reply: Result<JsonValue, ErrorKind>,
        calls: AtomicU32,
    }

    impl Stub {
        fn ok(name: &'static str, value: JsonValue) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Ok(value),
                calls: AtomicU32::new(0),
            })
        }

        fn failing(name: &'static str, kind: ErrorKind) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Err(kind),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl TierFetcher<JsonValue> for Stub {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(
            &self,
            _query: &TripQuery,
            _limit: Duration,
        ) -> Result<Fetched<JsonValue>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(value) => Ok(Fetched::single(value.clone())),
                Err(kind) => Err(ProviderError::new(*kind, format!("{} down", self.name))),
            }
        }
    }

    fn cache() -> Arc<CacheEngine<JsonValue>> {
        Arc::new(CacheEngine::new([NamespaceConfig::new(NS, 10, Duration::from_secs(60))]).unwrap())
    }

    fn query() -> TripQuery {
        TripQuery::new("Paris", "VA").budget(100).interests(["art", "food"])
    }

    #[tokio::test]
    async fn test_first_tier_wins_without_reason() {
        let primary = Stub::ok("premium", json!({"tier": 1}));
        let aggregated = Stub::ok("free", json!({"tier": 2}));
        let chain = FallbackChain::builder(cache(), NS)
            .primary(primary.clone())
            .aggregated(aggregated.clone())
            .build()
            .unwrap();

        let result = chain.get_data(&query()).await;

        assert_eq!(result.tier, Tier::Primary);
        assert_eq!(result.source, SourceTag::Primary);
        assert_eq!(result.confidence, 0.95);
        assert!(result.fallback_reason.is_none());
        assert_eq!(aggregated.calls.load(Ordering::SeqCst), 0, "tiers must not be raced");
    }

    #[tokio::test]
    async fn test_falls_through_in_order_and_caches() {
        let cache = cache();
        let chain = FallbackChain::builder(Arc::clone(&cache), NS)
            .retry(RetryPolicy::none())
            .scraped(Stub::ok("scraper", json!({"tier": 3})))
            .primary(Stub::failing("premium", ErrorKind::AuthFailed))
            .aggregated(Stub::failing("free", ErrorKind::NoDataFound))
            .build()
            .unwrap();

        assert_eq!(
            chain.live_tiers().collect::<Vec<_>>(),
            vec![Tier::Primary, Tier::Aggregated, Tier::Scraped]
        );

        let result = chain.get_data(&query()).await;

        assert_eq!(result.tier, Tier::Scraped);
        assert_eq!(result.source, SourceTag::Scraped);
        assert_eq!(result.failures.len(), 2);
        assert!(result
            .fallback_reason
            .as_deref()
            .unwrap()
            .starts_with("higher-priority tiers failed"));
        assert!(cache.has(NS, &query().cache_key(None)));
    }

    #[tokio::test]
    async fn test_confidence_strictly_decreases_by_tier() {
        let mut scores = Vec::new();
        for winner in Tier::LIVE {
            let mut builder = FallbackChain::builder(cache(), NS).retry(RetryPolicy::none());
            for tier in Tier::LIVE {
                let fetcher: Arc<dyn TierFetcher<JsonValue>> = if tier == winner {
                    Stub::ok("ok", json!({}))
                } else {
                    Stub::failing("down", ErrorKind::NotFound)
                };
                builder = builder.tier(tier, fetcher);
            }
            scores.push(builder.build().unwrap().get_data(&query()).await.confidence);
        }

        let empty = FallbackChain::builder(cache(), NS).build().unwrap();
        scores.push(empty.get_data(&query()).await.confidence);

        assert!(scores.windows(2).all(|w| w[0] > w[1]), "{:?}", scores);
    }

    #[tokio::test]
    async fn test_unknown_namespace_is_rejected() {
        let result = FallbackChain::<JsonValue>::builder(cache(), "nope").build();
        assert!(matches!(result, Err(CacheError::UnknownNamespace(_))));
    }

    #[tokio::test]
    async fn test_fallback_tier_registration_is_ignored() {
        let chain = FallbackChain::builder(cache(), NS)
            .tier(Tier::Fallback, Stub::ok("nope", json!({})))
            .build()
            .unwrap();
        assert_eq!(chain.live_tiers().count(), 0);

        let result = chain.get_data(&query()).await;
        assert_eq!(result.source, SourceTag::Mock);
        assert_eq!(
            result.fallback_reason.as_deref(),
            Some("no live tiers configured and no cached data; showing placeholder")
        );
    }
}
