//! # wayfinder-core
//!
//! Synchronous building blocks of the wayfinder data-acquisition layer.
//!
//! - [`CacheEngine`]: namespace-partitioned LRU cache with per-entry TTL
//! - [`ProviderError`] / [`ErrorKind`]: closed failure taxonomy and normalizer
//! - [`RetryPolicy`]: capped exponential backoff arithmetic
//! - [`CreditLedger`]: per-provider quota counters
//! - [`generate_key`]: canonical cache keys
//!
//! Nothing in this crate performs I/O or awaits; the async coordinator
//! lives in `wayfinder-runtime`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use wayfinder_core::{CacheEngine, NamespaceConfig, TripQuery, CacheKeySource};
//!
//! let cache = CacheEngine::new([NamespaceConfig::new("currency", 50, Duration::from_secs(900))])?;
//! let key = TripQuery::new("Lisbon", "NYC").budget(900).cache_key(None);
//! cache.set("currency", key.clone(), "EUR".to_string(), None)?;
//! assert_eq!(cache.get("currency", &key).as_deref(), Some("EUR"));
//! ```

pub mod cache;
pub mod credits;
pub mod duration;
pub mod error;
pub mod key;
pub mod retry;
pub mod types;

// Re-export main types at crate root
pub use cache::{CacheEngine, CacheEntry, CacheError, CacheStats, NamespaceConfig};
pub use credits::{CreditError, CreditLedger, ProviderCredit};
pub use error::{normalize, ErrorKind, ProviderError, RawFailure};
pub use key::{generate_key, normalize_component, normalize_interests, CacheKeySource};
pub use retry::RetryPolicy;
pub use types::{
    ConfidenceBands, FallbackResult, Payload, SourceTag, Tier, TierFailure, TripQuery,
};
