//! Core data types shared by the cache, the fallback chain and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value as JsonValue};
use std::fmt;

use crate::error::{ErrorKind, ProviderError};

/// Rank of a data source in the fallback chain.
///
/// Serialized as its number (1..=4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Best quality, most expensive source
    Primary = 1,
    /// Several free sources queried concurrently
    Aggregated = 2,
    /// Credit-limited scraping backends
    Scraped = 3,
    /// Cached or synthesized data, no external call
    Fallback = 4,
}

impl Tier {
    /// The tiers that make external calls, in the order they are tried.
    pub const LIVE: [Tier; 3] = [Tier::Primary, Tier::Aggregated, Tier::Scraped];

    pub const fn rank(self) -> u8 {
        self as u8
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            1 => Some(Tier::Primary),
            2 => Some(Tier::Aggregated),
            3 => Some(Tier::Scraped),
            4 => Some(Tier::Fallback),
            _ => None,
        }
    }

    /// Source tag written into results produced by a live tier.
    pub const fn default_source(self) -> SourceTag {
        match self {
            Tier::Primary => SourceTag::Primary,
            Tier::Aggregated => SourceTag::Aggregated,
            Tier::Scraped => SourceTag::Scraped,
            Tier::Fallback => SourceTag::Cache,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {}", self.rank())
    }
}

impl Serialize for Tier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.rank())
    }
}

impl<'de> Deserialize<'de> for Tier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rank = u8::deserialize(deserializer)?;
        Tier::from_rank(rank)
            .ok_or_else(|| serde::de::Error::custom(format!("tier must be 1..=4, got {}", rank)))
    }
}

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceTag {
    Primary,
    Aggregated,
    Scraped,
    Cache,
    Mock,
}

impl SourceTag {
    pub const fn as_str(self) -> &'static str {
        match self {
            SourceTag::Primary => "primary",
            SourceTag::Aggregated => "aggregated",
            SourceTag::Scraped => "scraped",
            SourceTag::Cache => "cache",
            SourceTag::Mock => "mock",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trip-planning request as seen by the acquisition layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripQuery {
    pub destination: String,
    pub origin: String,
    /// Whole currency units
    #[serde(default)]
    pub budget: u32,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default = "default_duration_days")]
    pub duration_days: u32,
}

fn default_duration_days() -> u32 {
    1
}

impl TripQuery {
    pub fn new(destination: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            origin: origin.into(),
            budget: 0,
            interests: Vec::new(),
            duration_days: default_duration_days(),
        }
    }

    pub fn budget(mut self, budget: u32) -> Self {
        self.budget = budget;
        self
    }

    pub fn interests<I, S>(mut self, interests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interests = interests.into_iter().map(Into::into).collect();
        self
    }

    pub fn duration_days(mut self, days: u32) -> Self {
        self.duration_days = days;
        self
    }
}

/// Data that can flow through the fallback chain.
///
/// Sub-sources inside one tier return partial payloads that are merged;
/// when every source and the cache fail, a placeholder is synthesized.
pub trait Payload: Clone + Send + Sync + 'static {
    /// Fold a later partial result into this one.
    fn merge(&mut self, other: Self);

    /// Synthetic stand-in used when nothing else is available.
    fn placeholder(query: &TripQuery) -> Self;
}

impl Payload for JsonValue {
    /// Objects are merged key-wise: keys already present win, so the first
    /// successful sub-source keeps priority. Non-objects are collected into
    /// an array.
    fn merge(&mut self, other: Self) {
        if other.is_null() {
            return;
        }
        if self.is_null() {
            *self = other;
            return;
        }

        match (self, other) {
            (JsonValue::Object(ours), JsonValue::Object(theirs)) => {
                for (key, value) in theirs {
                    if let Some(existing) = ours.get_mut(&key) {
                        if existing.is_object() && value.is_object() {
                            existing.merge(value);
                        }
                    } else {
                        ours.insert(key, value);
                    }
                }
            }
            (JsonValue::Array(items), other) => items.push(other),
            (this, other) => {
                let previous = std::mem::take(this);
                *this = JsonValue::Array(vec![previous, other]);
            }
        }
    }

    fn placeholder(query: &TripQuery) -> Self {
        json!({
            "destination": query.destination,
            "origin": query.origin,
            "budget": query.budget,
            "interests": query.interests,
            "duration_days": query.duration_days,
            "placeholder": true,
        })
    }
}

/// Confidence ceilings per tier.
///
/// Ceilings must be strictly decreasing from `primary` to `placeholder`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceBands {
    pub primary: f64,
    pub aggregated: f64,
    pub scraped: f64,
    /// Tier 4 served from cache
    pub cache: f64,
    /// Tier 4 synthesized
    pub placeholder: f64,
    /// Added per corroborating sub-source beyond the first
    pub corroboration_bonus: f64,
}

impl Default for ConfidenceBands {
    fn default() -> Self {
        Self {
            primary: 0.95,
            aggregated: 0.80,
            scraped: 0.70,
            cache: 0.60,
            placeholder: 0.50,
            corroboration_bonus: 0.02,
        }
    }
}

impl ConfidenceBands {
    /// Gap kept between a nudged score and the ceiling of the tier above.
    const HEADROOM: f64 = 0.01;

    pub fn ceiling(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Primary => self.primary,
            Tier::Aggregated => self.aggregated,
            Tier::Scraped => self.scraped,
            Tier::Fallback => self.cache,
        }
    }

    /// Confidence for a live tier that was corroborated by `sources` sub-sources.
    pub fn score(&self, tier: Tier, sources: usize) -> f64 {
        let base = self.ceiling(tier);
        let extra = sources.saturating_sub(1) as f64 * self.corroboration_bonus;
        let cap = match tier {
            Tier::Primary => 1.0 - Self::HEADROOM,
            Tier::Aggregated => self.primary - Self::HEADROOM,
            Tier::Scraped => self.aggregated - Self::HEADROOM,
            Tier::Fallback => self.scraped - Self::HEADROOM,
        };
        (base + extra).min(cap.max(base)).clamp(0.0, 1.0)
    }

    /// Check ordering and range; returns a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        let ordered = [
            ("primary", self.primary),
            ("aggregated", self.aggregated),
            ("scraped", self.scraped),
            ("cache", self.cache),
            ("placeholder", self.placeholder),
        ];

        for (name, value) in ordered {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("confidence.{} must be within [0, 1], got {}", name, value));
            }
        }
        for pair in ordered.windows(2) {
            if pair[0].1 <= pair[1].1 {
                return Err(format!(
                    "confidence.{} ({}) must be greater than confidence.{} ({})",
                    pair[0].0, pair[0].1, pair[1].0, pair[1].1
                ));
            }
        }
        if !(0.0..=0.1).contains(&self.corroboration_bonus) {
            return Err(format!(
                "confidence.corroboration_bonus must be within [0, 0.1], got {}",
                self.corroboration_bonus
            ));
        }
        Ok(())
    }
}

/// A live tier that did not produce data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierFailure {
    pub tier: Tier,
    pub source: String,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

impl TierFailure {
    pub fn new(
        tier: Tier,
        source: impl Into<String>,
        error: &ProviderError,
        attempts: u32,
    ) -> Self {
        Self {
            tier,
            source: source.into(),
            kind: error.kind,
            message: error.message.clone(),
            attempts,
        }
    }
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} after {} attempt{})",
            self.tier,
            self.source,
            self.kind,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" }
        )
    }
}

/// What every fallback chain request resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackResult<T> {
    pub data: T,
    pub source: SourceTag,
    pub tier: Tier,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TierFailure>,
}

impl<T> FallbackResult<T> {
    pub fn new(data: T, source: SourceTag, tier: Tier, confidence: f64) -> Self {
        Self {
            data,
            source,
            tier,
            confidence,
            timestamp: Utc::now(),
            fallback_reason: None,
            failures: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.fallback_reason = Some(reason.into());
        self
    }

    pub fn with_failures(mut self, failures: Vec<TierFailure>) -> Self {
        self.failures = failures;
        self
    }

    /// True when the data did not come from a live tier.
    pub fn is_degraded(&self) -> bool {
        self.tier == Tier::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Tier::Scraped).unwrap(), "3");
        let tier: Tier = serde_json::from_str("4").unwrap();
        assert_eq!(tier, Tier::Fallback);
        assert!(serde_json::from_str::<Tier>("5").is_err());
    }

    #[test]
    fn test_default_bands_strictly_decrease() {
        let bands = ConfidenceBands::default();
        assert!(bands.validate().is_ok());
        assert!(bands.ceiling(Tier::Primary) > bands.ceiling(Tier::Aggregated));
        assert!(bands.ceiling(Tier::Aggregated) > bands.ceiling(Tier::Scraped));
        assert!(bands.ceiling(Tier::Scraped) > bands.ceiling(Tier::Fallback));
    }

    #[test]
    fn test_corroboration_nudge_is_capped() {
        let bands = ConfidenceBands::default();

        assert_eq!(bands.score(Tier::Aggregated, 1), 0.80);
        assert!((bands.score(Tier::Aggregated, 3) - 0.84).abs() < 1e-9);

        // Many sources never reach the tier above.
        let nudged = bands.score(Tier::Aggregated, 50);
        assert!(nudged < bands.primary);
        assert!((nudged - 0.94).abs() < 1e-9);
    }

    #[test]
    fn test_bands_validation_rejects_inversion() {
        let bands = ConfidenceBands {
            scraped: 0.85,
            ..Default::default()
        };
        let err = bands.validate().unwrap_err();
        assert!(err.contains("aggregated"));
    }

    #[test]
    fn test_json_merge_keeps_first_and_fills_gaps() {
        let mut ours = json!({"weather": {"temp": 20}, "currency": "EUR"});
        ours.merge(json!({"weather": {"temp": 25, "rain": false}, "news": []}));

        assert_eq!(ours["weather"]["temp"], 20);
        assert_eq!(ours["weather"]["rain"], false);
        assert_eq!(ours["currency"], "EUR");
        assert!(ours["news"].is_array());
    }

    #[test]
    fn test_placeholder_describes_query() {
        let query = TripQuery::new("Lisbon", "NYC").budget(900).duration_days(4);
        let placeholder = JsonValue::placeholder(&query);

        assert_eq!(placeholder["destination"], "Lisbon");
        assert_eq!(placeholder["placeholder"], true);
    }

    #[test]
    fn test_result_json_shape() {
        let result = FallbackResult::new(json!({"a": 1}), SourceTag::Mock, Tier::Fallback, 0.5)
            .with_reason("all live tiers failed");
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["source"], "mock");
        assert_eq!(value["tier"], 4);
        assert_eq!(value["fallbackReason"], "all live tiers failed");
        assert!(value.get("failures").is_none());
    }
}
