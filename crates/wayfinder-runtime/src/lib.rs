//! # wayfinder-runtime
//!
//! Async acquisition layer built on `wayfinder-core`.
//!
//! Callers hand a [`TripQuery`] to a [`FallbackChain`] and always get a
//! [`FallbackResult`] back. The chain walks the tiers strictly in order:
//!
//! 1. **Primary**: one premium source
//! 2. **Aggregated**: free sources queried concurrently, partial results merged
//! 3. **Scraped**: credit-limited scraping backends behind a [`ScrapePool`]
//! 4. **Fallback**: cached data, or a placeholder when the cache is empty
//!
//! Every live tier call goes through the [`RetryInvoker`]. The cache and
//! credit ledger are built once at the composition root and shared by `Arc`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wayfinder_runtime::{FallbackChain, RuntimeConfig, SingleSourceTier, spawn_sweeper};
//!
//! let config = RuntimeConfig::from_file("wayfinder.yaml")?;
//! let cache = Arc::new(config.build_cache::<serde_json::Value>()?);
//! let _sweeper = spawn_sweeper(Arc::clone(&cache), config.cleanup_interval);
//!
//! let chain = FallbackChain::builder(cache, "destination-intelligence")
//!     .config(&config)
//!     .primary(Arc::new(SingleSourceTier::new(premium)))
//!     .build()?;
//!
//! let result = chain.get_data(&TripQuery::new("Lisbon", "NYC")).await;
//! println!("{} from {} ({})", result.tier, result.source, result.confidence);
//! ```

pub mod cached;
pub mod chain;
pub mod config;
pub mod invoker;
pub mod providers;
pub mod sweeper;
pub mod tiers;

pub use cached::{with_cache, CachedFetch};
pub use chain::{FallbackChain, FallbackChainBuilder};
pub use config::{ConfigError, ProviderConfig, RuntimeConfig, TierConfig, TiersConfig};
pub use invoker::{Invocation, RetryInvoker};
pub use providers::{
    ApiCredential, CredentialSource, PoolError, PoolScrape, ScrapeBackend, ScrapeFormat,
    ScrapeOutput, ScrapePool, SubSource,
};
pub use sweeper::{spawn_sweeper, sweep_once, SweeperHandle, DEFAULT_SWEEP_INTERVAL};
pub use tiers::{ConcurrentTier, Fetched, ScrapeTier, SingleSourceTier, TierFetcher};

#[cfg(feature = "http")]
pub use providers::HttpScrapeBackend;

pub use wayfinder_core::{FallbackResult, Payload, TripQuery};
