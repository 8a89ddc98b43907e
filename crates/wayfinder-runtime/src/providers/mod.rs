//! Provider abstractions consumed by the live tiers.
//!
//! - [`SubSource`]: one upstream that answers a [`TripQuery`] (tier 1 has
//!   one, tier 2 fans out to several).
//! - [`ScrapeBackend`]: a credit-limited scraping service used by tier 3
//!   through a [`ScrapePool`].
//!
//! ## Security
//!
//! Backends that need API keys hold them as [`ApiCredential`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;

use wayfinder_core::{ProviderError, TripQuery};

mod pool;
pub mod secrets;

#[cfg(feature = "http")]
mod http;

pub use pool::{PoolError, PoolScrape, ScrapePool};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "http")]
pub use http::HttpScrapeBackend;

/// Default bound on a single upstream call.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// An upstream data source for one query.
#[async_trait]
pub trait SubSource<T>: Send + Sync {
    /// Name for logs and failure records.
    fn name(&self) -> &str;

    async fn fetch(&self, query: &TripQuery) -> Result<T, ProviderError>;

    /// Upper bound for one call to this source.
    fn timeout(&self) -> Duration {
        DEFAULT_SOURCE_TIMEOUT
    }
}

/// Output format requested from a scraping backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeFormat {
    #[default]
    Markdown,
    Html,
    Json,
}

impl ScrapeFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            ScrapeFormat::Markdown => "markdown",
            ScrapeFormat::Html => "html",
            ScrapeFormat::Json => "json",
        }
    }
}

impl fmt::Display for ScrapeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a scraping backend returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOutput {
    pub data: JsonValue,

    /// Credits the provider billed for this call
    #[serde(default = "default_credits_used")]
    pub credits_used: u32,

    #[serde(default)]
    pub processing_time_ms: u64,
}

fn default_credits_used() -> u32 {
    1
}

impl ScrapeOutput {
    pub fn new(data: JsonValue) -> Self {
        Self {
            data,
            credits_used: default_credits_used(),
            processing_time_ms: 0,
        }
    }
}

/// A quota-limited scraping service.
#[async_trait]
pub trait ScrapeBackend: Send + Sync {
    /// Must match the provider's credit account name.
    fn name(&self) -> &str;

    /// Fetch `url` rendered as `format`.
    async fn scrape(&self, url: &str, format: ScrapeFormat) -> Result<ScrapeOutput, ProviderError>;

    fn timeout(&self) -> Duration {
        DEFAULT_SOURCE_TIMEOUT
    }
}
