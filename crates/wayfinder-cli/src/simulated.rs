//! In-process providers for `wayfinder simulate`.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;

use wayfinder_core::{CreditLedger, ErrorKind, ProviderError, TripQuery};
use wayfinder_runtime::{
    ConcurrentTier, ScrapeBackend, ScrapeFormat, ScrapeOutput, ScrapePool, ScrapeTier,
    SingleSourceTier, SubSource, TierFetcher,
};

/// A source that answers with canned data, or fails with `failure`.
pub struct SimulatedSource {
    name: String,
    field: &'static str,
    failure: Option<ErrorKind>,
    latency: Duration,
}

impl SimulatedSource {
    pub fn new(
        name: impl Into<String>,
        field: &'static str,
        failure: Option<ErrorKind>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            field,
            failure,
            latency: Duration::from_millis(20),
        })
    }
}

#[async_trait]
impl SubSource<JsonValue> for SimulatedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, query: &TripQuery) -> Result<JsonValue, ProviderError> {
        tokio::time::sleep(self.latency).await;
        if let Some(kind) = self.failure {
            return Err(ProviderError::new(kind, format!("{} is simulated as down", self.name)));
        }
        let mut data = serde_json::Map::new();
        data.insert(
            self.field.to_string(),
            json!({
                "destination": query.destination,
                "provider": self.name,
            }),
        );
        Ok(JsonValue::Object(data))
    }
}

/// A scraping backend that rate-limits when `fail` is set.
pub struct SimulatedScraper {
    name: String,
    fail: bool,
}

#[async_trait]
impl ScrapeBackend for SimulatedScraper {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scrape(&self, url: &str, format: ScrapeFormat) -> Result<ScrapeOutput, ProviderError> {
        if self.fail {
            return Err(ProviderError::from_status(429, "Too Many Requests"));
        }
        Ok(ScrapeOutput {
            data: json!({ "guide": { "url": url, "format": format, "scrapedBy": self.name } }),
            credits_used: 1,
            processing_time_ms: 35,
        })
    }
}

pub fn primary(fail: bool) -> Arc<dyn TierFetcher<JsonValue>> {
    let failure = fail.then_some(ErrorKind::ServiceUnavailable);
    let source = SimulatedSource::new("premium-guide", "guide", failure);
    Arc::new(SingleSourceTier::new(source as Arc<dyn SubSource<JsonValue>>))
}

pub fn aggregated(fail: bool) -> Arc<dyn TierFetcher<JsonValue>> {
    let failure = fail.then_some(ErrorKind::NetworkError);
    let sources: Vec<Arc<dyn SubSource<JsonValue>>> = vec![
        SimulatedSource::new("news", "news", failure),
        SimulatedSource::new("currency", "currency", failure),
        SimulatedSource::new("events", "events", failure),
    ];
    Arc::new(ConcurrentTier::new("free-apis", sources))
}

pub fn scraped(
    ledger: Arc<CreditLedger>,
    fail: bool,
) -> anyhow::Result<Arc<dyn TierFetcher<JsonValue>>> {
    let backends: Vec<Arc<dyn ScrapeBackend>> = ledger
        .providers()
        .map(|name| {
            Arc::new(SimulatedScraper {
                name: name.to_string(),
                fail,
            }) as Arc<dyn ScrapeBackend>
        })
        .collect();
    let pool = Arc::new(ScrapePool::new(ledger, backends)?);

    Ok(Arc::new(ScrapeTier::<JsonValue>::new(
        "scrapers",
        pool,
        ScrapeFormat::Json,
        |query: &TripQuery| {
            format!(
                "https://guides.example.com/{}",
                query.destination.trim().to_lowercase().replace(' ', "-")
            )
        },
    )))
}
