//! End-to-end behaviour of the fallback chain with in-process providers.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use wayfinder_core::{
    CacheEngine, CacheKeySource, CreditLedger, ErrorKind, NamespaceConfig, ProviderError,
    RetryPolicy, SourceTag, Tier, TripQuery,
};
use wayfinder_runtime::{
    ConcurrentTier, FallbackChain, RuntimeConfig, ScrapeBackend, ScrapeFormat, ScrapeOutput,
    ScrapePool, ScrapeTier, SingleSourceTier, SubSource, TierFetcher,
};

const NS: &str = "destination-intelligence";

/// Replies from a script, then repeats the last reply.
struct ScriptedSource {
    name: &'static str,
    script: Mutex<VecDeque<Result<JsonValue, ErrorKind>>>,
    last: Mutex<Option<Result<JsonValue, ErrorKind>>>,
    calls: AtomicU32,
}

impl ScriptedSource {
    fn new(name: &'static str, script: Vec<Result<JsonValue, ErrorKind>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        })
    }

    fn always(name: &'static str, reply: Result<JsonValue, ErrorKind>) -> Arc<Self> {
        Self::new(name, vec![reply])
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubSource<JsonValue> for ScriptedSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, _query: &TripQuery) -> Result<JsonValue, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = match self.script.lock().pop_front() {
            Some(reply) => {
                *self.last.lock() = Some(reply.clone());
                reply
            }
            None => self
                .last
                .lock()
                .clone()
                .unwrap_or(Err(ErrorKind::NoDataFound)),
        };
        reply.map_err(|kind| ProviderError::new(kind, format!("{} failed", self.name)))
    }
}

struct CountingScraper {
    name: &'static str,
}

#[async_trait]
impl ScrapeBackend for CountingScraper {
    fn name(&self) -> &str {
        self.name
    }

    async fn scrape(
        &self,
        url: &str,
        _format: ScrapeFormat,
    ) -> Result<ScrapeOutput, ProviderError> {
        Ok(ScrapeOutput::new(json!({ "scrapedBy": self.name, "url": url })))
    }
}

/// Never answers within any sane timeout.
struct Hanging;

#[async_trait]
impl SubSource<JsonValue> for Hanging {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn fetch(&self, _query: &TripQuery) -> Result<JsonValue, ProviderError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!({}))
    }
}

fn cache() -> Arc<CacheEngine<JsonValue>> {
    Arc::new(CacheEngine::new([NamespaceConfig::new(NS, 100, Duration::from_secs(3600))]).unwrap())
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(3)
        .with_base_delay(Duration::from_millis(100))
        .with_multiplier(2.0)
}

fn single(source: Arc<ScriptedSource>) -> Arc<dyn TierFetcher<JsonValue>> {
    Arc::new(SingleSourceTier::new(source as Arc<dyn SubSource<JsonValue>>))
}

fn failing_chain(cache: Arc<CacheEngine<JsonValue>>) -> FallbackChain<JsonValue> {
    FallbackChain::builder(cache, NS)
        .retry(RetryPolicy::none())
        .primary(single(ScriptedSource::always("premium", Err(ErrorKind::AuthFailed))))
        .aggregated(single(ScriptedSource::always("free", Err(ErrorKind::ServiceUnavailable))))
        .scraped(single(ScriptedSource::always("scraper", Err(ErrorKind::QuotaExceeded))))
        .build()
        .unwrap()
}

fn query() -> TripQuery {
    TripQuery::new("Paris", "VA").budget(100).interests(["art", "food"])
}

#[tokio::test]
async fn test_all_tiers_fail_with_empty_cache_returns_mock() {
    let chain = failing_chain(cache());

    let result = chain.get_data(&query()).await;

    assert_eq!(result.source, SourceTag::Mock);
    assert_eq!(result.tier, Tier::Fallback);
    assert!(result.confidence <= 0.6);
    assert_eq!(result.data["placeholder"], true);
    assert_eq!(result.failures.len(), 3);
    assert!(result.fallback_reason.is_some());
}

#[tokio::test]
async fn test_all_tiers_fail_with_prior_cache_entry_returns_cache() {
    let cache = cache();
    let key = query().cache_key(None);
    cache
        .set(NS, key, json!({"weather": "sunny"}), None)
        .unwrap();

    let result = failing_chain(Arc::clone(&cache)).get_data(&query()).await;

    assert_eq!(result.source, SourceTag::Cache);
    assert_eq!(result.tier, Tier::Fallback);
    assert_eq!(result.data["weather"], "sunny");
    assert!(result.confidence > 0.5 && result.confidence < 0.7);
}

#[tokio::test]
async fn test_live_success_feeds_later_cache_fallback() {
    let cache = cache();
    let good = FallbackChain::builder(Arc::clone(&cache), NS)
        .aggregated(single(ScriptedSource::always("free", Ok(json!({"news": []})))))
        .build()
        .unwrap();
    let first = good.get_data(&query()).await;
    assert_eq!(first.tier, Tier::Aggregated);

    // Same query spelled differently hits the same key.
    let respelled = TripQuery::new(" PARIS ", "va").budget(100).interests(["Food", "art"]);
    let fallback = failing_chain(cache).get_data(&respelled).await;

    assert_eq!(fallback.source, SourceTag::Cache);
    assert_eq!(fallback.data, first.data);
}

#[tokio::test(start_paused = true)]
async fn test_tier_retries_transient_failures() {
    let flaky = ScriptedSource::new(
        "premium",
        vec![
            Err(ErrorKind::ServiceUnavailable),
            Err(ErrorKind::Timeout),
            Ok(json!({"guide": "full"})),
        ],
    );
    let chain = FallbackChain::builder(cache(), NS)
        .retry(fast_retry())
        .primary(single(Arc::clone(&flaky)))
        .build()
        .unwrap();
    let started = tokio::time::Instant::now();

    let result = chain.get_data(&query()).await;

    assert_eq!(result.tier, Tier::Primary);
    assert_eq!(flaky.calls(), 3);
    assert!(started.elapsed() >= Duration::from_millis(100 + 200));
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_failure_is_attempted_once() {
    let premium = ScriptedSource::always("premium", Err(ErrorKind::AuthFailed));
    let chain = FallbackChain::builder(cache(), NS)
        .retry(fast_retry())
        .primary(single(Arc::clone(&premium)))
        .aggregated(single(ScriptedSource::always("free", Ok(json!({"ok": true})))))
        .build()
        .unwrap();

    let result = chain.get_data(&query()).await;

    assert_eq!(premium.calls(), 1);
    assert_eq!(result.tier, Tier::Aggregated);
    assert_eq!(result.failures[0].kind, ErrorKind::AuthFailed);
    assert_eq!(result.failures[0].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_tier_times_out_and_falls_back() {
    let mut config = RuntimeConfig::default();
    config.retry = RetryPolicy::none();
    config.tiers.primary.timeout = Duration::from_millis(250);

    let chain = FallbackChain::builder(cache(), NS)
        .config(&config)
        .primary(Arc::new(SingleSourceTier::new(
            Arc::new(Hanging) as Arc<dyn SubSource<JsonValue>>
        )))
        .aggregated(single(ScriptedSource::always("free", Ok(json!({"ok": true})))))
        .build()
        .unwrap();

    let result = chain.get_data(&query()).await;

    assert_eq!(result.tier, Tier::Aggregated);
    assert_eq!(result.failures[0].kind, ErrorKind::Timeout);
}

#[tokio::test(start_paused = true)]
async fn test_hung_sibling_does_not_discard_fast_source() {
    let fast = ScriptedSource::always("currency", Ok(json!({"currency": "EUR"})));
    let sources: Vec<Arc<dyn SubSource<JsonValue>>> = vec![fast.clone(), Arc::new(Hanging)];

    let mut config = RuntimeConfig::default();
    config.tiers.aggregated.timeout = Duration::from_secs(2);

    let chain = FallbackChain::builder(cache(), NS)
        .config(&config)
        .aggregated(Arc::new(ConcurrentTier::new("free-apis", sources)))
        .build()
        .unwrap();

    let result = chain.get_data(&query()).await;

    assert_eq!(result.tier, Tier::Aggregated);
    assert_eq!(result.data["currency"], "EUR");
    assert_eq!(result.confidence, 0.80);
    assert!(result.failures.is_empty());
    assert_eq!(fast.calls(), 1);
}

#[tokio::test]
async fn test_corroborated_aggregate_gets_capped_nudge() {
    let sources: Vec<Arc<dyn SubSource<JsonValue>>> = vec![
        ScriptedSource::always("news", Ok(json!({"news": ["parade"]}))),
        ScriptedSource::always("currency", Ok(json!({"currency": "EUR"}))),
        ScriptedSource::always("social", Err(ErrorKind::NetworkError)),
    ];
    let chain = FallbackChain::builder(cache(), NS)
        .retry(RetryPolicy::none())
        .aggregated(Arc::new(ConcurrentTier::new("free-apis", sources)))
        .build()
        .unwrap();

    let result = chain.get_data(&query()).await;

    assert_eq!(result.tier, Tier::Aggregated);
    assert_eq!(result.data["currency"], "EUR");
    assert_eq!(result.data["news"][0], "parade");
    assert!(result.confidence > 0.80 && result.confidence < 0.95);
}

#[tokio::test]
async fn test_scrape_tier_fails_over_between_providers() {
    let ledger = Arc::new(CreditLedger::new([("alpha", 1), ("beta", 10)]).unwrap());
    let backends: Vec<Arc<dyn ScrapeBackend>> = vec![
        Arc::new(CountingScraper { name: "alpha" }),
        Arc::new(CountingScraper { name: "beta" }),
    ];
    let pool = Arc::new(ScrapePool::new(Arc::clone(&ledger), backends).unwrap());
    let scrape_tier: Arc<dyn TierFetcher<JsonValue>> = Arc::new(ScrapeTier::<JsonValue>::new(
        "scrapers",
        pool,
        ScrapeFormat::Markdown,
        |q: &TripQuery| format!("https://guides.example.com/{}", q.destination.to_lowercase()),
    ));

    let chain = FallbackChain::builder(cache(), NS)
        .retry(RetryPolicy::none())
        .primary(single(ScriptedSource::always("premium", Err(ErrorKind::QuotaExceeded))))
        .scraped(scrape_tier)
        .build()
        .unwrap();

    let first = chain.get_data(&query()).await;
    let second = chain.get_data(&TripQuery::new("Rome", "VA")).await;

    assert_eq!(first.source, SourceTag::Scraped);
    assert_eq!(first.data["scrapedBy"], "alpha");
    assert_eq!(second.data["scrapedBy"], "beta");
    assert_eq!(second.data["url"], "https://guides.example.com/rome");
    assert_eq!(ledger.credit("alpha").unwrap().remaining, 0);
    assert_eq!(ledger.credit("beta").unwrap().used, 1);
}

#[tokio::test]
async fn test_exhausted_pool_is_an_ordinary_tier_failure() {
    let ledger = Arc::new(CreditLedger::new([("alpha", 0)]).unwrap());
    let backends: Vec<Arc<dyn ScrapeBackend>> = vec![Arc::new(CountingScraper { name: "alpha" })];
    let pool = Arc::new(ScrapePool::new(ledger, backends).unwrap());

    let chain = FallbackChain::builder(cache(), NS)
        .retry(fast_retry())
        .scraped(Arc::new(ScrapeTier::<JsonValue>::new("scrapers", pool, ScrapeFormat::Json, |_| {
            "https://example.com".to_string()
        })))
        .build()
        .unwrap();

    let result = chain.get_data(&query()).await;

    assert_eq!(result.source, SourceTag::Mock);
    assert_eq!(result.failures[0].tier, Tier::Scraped);
    assert_eq!(result.failures[0].kind, ErrorKind::QuotaExceeded);
    assert_eq!(result.failures[0].attempts, 1);
}

#[tokio::test]
async fn test_result_serializes_for_http_boundary() {
    let result = failing_chain(cache()).get_data(&query()).await;
    let body = serde_json::to_value(&result).unwrap();

    assert_eq!(body["source"], "mock");
    assert_eq!(body["tier"], 4);
    assert!(body["fallbackReason"].is_string());
    assert_eq!(body["failures"][0]["kind"], "AUTH_FAILED");
}
