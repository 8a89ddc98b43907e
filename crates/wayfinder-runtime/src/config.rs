//! Runtime configuration.
//!
//! Loaded from YAML; every section has a default so a partial file is valid.
//!
//! ```yaml
//! namespaces:
//!   - name: destination-intelligence
//!     capacity: 100
//!     default_ttl: 1h
//! tiers:
//!   primary:    { ttl: 1h,  timeout: 30s }
//!   aggregated: { ttl: 30m, timeout: 10s }
//!   scraped:    { ttl: 2h,  timeout: 45s }
//! confidence:
//!   primary: 0.95
//!   placeholder: 0.5
//! cleanup_interval: 60s
//! retry:
//!   max_retries: 3
//!   base_delay: 500ms
//! providers:
//!   - name: scraper-a
//!     credits: 1000
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use wayfinder_core::{
    CacheEngine, CacheError, ConfidenceBands, CreditError, CreditLedger, NamespaceConfig,
    RetryPolicy, Tier,
};

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {0}")]
    Invalid(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Credit(#[from] CreditError),
}

/// Cache TTL and per-attempt timeout of one live tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// How long a result from this tier stays cached
    #[serde(with = "wayfinder_core::duration")]
    pub ttl: Duration,

    /// Upper bound for a single attempt against this tier
    #[serde(with = "wayfinder_core::duration")]
    pub timeout: Duration,
}

impl TierConfig {
    pub fn new(ttl: Duration, timeout: Duration) -> Self {
        Self { ttl, timeout }
    }
}

/// Settings for the three live tiers.
///
/// Deserialized field by field over the defaults, so `aggregated: { ttl: 5m }`
/// keeps the aggregated tier's default timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TiersOverrides")]
pub struct TiersConfig {
    pub primary: TierConfig,
    pub aggregated: TierConfig,
    pub scraped: TierConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TierOverrides {
    #[serde(with = "wayfinder_core::duration::option")]
    ttl: Option<Duration>,

    #[serde(with = "wayfinder_core::duration::option")]
    timeout: Option<Duration>,
}

impl TierOverrides {
    fn over(self, base: TierConfig) -> TierConfig {
        TierConfig {
            ttl: self.ttl.unwrap_or(base.ttl),
            timeout: self.timeout.unwrap_or(base.timeout),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TiersOverrides {
    primary: TierOverrides,
    aggregated: TierOverrides,
    scraped: TierOverrides,
}

impl From<TiersOverrides> for TiersConfig {
    fn from(overrides: TiersOverrides) -> Self {
        let defaults = TiersConfig::default();
        Self {
            primary: overrides.primary.over(defaults.primary),
            aggregated: overrides.aggregated.over(defaults.aggregated),
            scraped: overrides.scraped.over(defaults.scraped),
        }
    }
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            primary: TierConfig::new(Duration::from_secs(60 * 60), Duration::from_secs(30)),
            aggregated: TierConfig::new(Duration::from_secs(30 * 60), Duration::from_secs(10)),
            scraped: TierConfig::new(Duration::from_secs(2 * 60 * 60), Duration::from_secs(45)),
        }
    }
}

impl TiersConfig {
    /// Settings for a live tier; `None` for [`Tier::Fallback`].
    pub fn get(&self, tier: Tier) -> Option<&TierConfig> {
        match tier {
            Tier::Primary => Some(&self.primary),
            Tier::Aggregated => Some(&self.aggregated),
            Tier::Scraped => Some(&self.scraped),
            Tier::Fallback => None,
        }
    }
}

/// A credit-limited scraping provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    /// Credits available until an administrative reset
    pub credits: u32,

    /// Base URL of the provider's scrape endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Environment variable holding the provider's API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, credits: u32) -> Self {
        Self {
            name: name.into(),
            credits,
            endpoint: None,
            api_key_env: None,
        }
    }
}

/// Configuration of the whole acquisition layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Cache partitions
    pub namespaces: Vec<NamespaceConfig>,

    /// Per-tier cache TTL and timeout
    pub tiers: TiersConfig,

    /// Confidence ceilings per tier
    pub confidence: ConfidenceBands,

    /// Interval of the background expiry sweep
    #[serde(with = "wayfinder_core::duration")]
    pub cleanup_interval: Duration,

    /// Retry policy applied to every live tier
    pub retry: RetryPolicy,

    /// Scrape providers in priority order
    pub providers: Vec<ProviderConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            namespaces: vec![
                NamespaceConfig::new(
                    "destination-intelligence",
                    100,
                    Duration::from_secs(60 * 60),
                ),
                NamespaceConfig::new("currency", 50, Duration::from_secs(15 * 60)),
            ],
            tiers: TiersConfig::default(),
            confidence: ConfidenceBands::default(),
            cleanup_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            providers: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check every cross-field constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for ns in &self.namespaces {
            if ns.name.trim().is_empty() {
                return Err(invalid("namespace names must not be empty"));
            }
            if ns.capacity == 0 {
                return Err(CacheError::ZeroCapacity(ns.name.clone()).into());
            }
            if !names.insert(ns.name.as_str()) {
                return Err(CacheError::DuplicateNamespace(ns.name.clone()).into());
            }
        }

        for tier in Tier::LIVE {
            if let Some(settings) = self.tiers.get(tier) {
                if settings.timeout.is_zero() {
                    return Err(invalid(format!("{} timeout must be positive", tier)));
                }
            }
        }

        self.confidence.validate().map_err(ConfigError::Invalid)?;

        if self.cleanup_interval.is_zero() {
            return Err(invalid("cleanup_interval must be positive"));
        }

        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(invalid(format!(
                "retry.backoff_multiplier must be >= 1, got {}",
                self.retry.backoff_multiplier
            )));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(invalid("retry.base_delay must not exceed retry.max_delay"));
        }

        let mut providers = HashSet::new();
        for provider in &self.providers {
            if !providers.insert(provider.name.as_str()) {
                return Err(CreditError::DuplicateProvider(provider.name.clone()).into());
            }
        }

        Ok(())
    }

    /// Construct the process-wide cache from `namespaces`.
    pub fn build_cache<V: Clone>(&self) -> Result<CacheEngine<V>, ConfigError> {
        Ok(CacheEngine::new(self.namespaces.iter().cloned())?)
    }

    /// Construct the process-wide credit ledger from `providers`.
    pub fn build_ledger(&self) -> Result<CreditLedger, ConfigError> {
        Ok(CreditLedger::new(
            self.providers.iter().map(|p| (p.name.clone(), p.credits)),
        )?)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}
