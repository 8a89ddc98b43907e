//! Retry policy arithmetic.
//!
//! The async invoker lives in `wayfinder-runtime`; this module only decides
//! *whether* to retry and *how long* to wait.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::ErrorKind;

/// Capped exponential backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (so `max_retries + 1` attempts in total)
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "crate::duration")]
    pub base_delay: Duration,

    /// Upper bound for any single delay
    #[serde(with = "crate::duration")]
    pub max_delay: Duration,

    pub backoff_multiplier: f64,

    /// Kinds worth another attempt
    pub retryable: BTreeSet<ErrorKind>,
}

fn default_retryable() -> BTreeSet<ErrorKind> {
    ErrorKind::ALL
        .iter()
        .copied()
        .filter(|kind| kind.is_retryable())
        .collect()
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            retryable: default_retryable(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Whether `kind` may be retried under this policy.
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// Delay before retry number `attempt` (0-based):
    /// `min(base_delay * multiplier^attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let nanos = (self.base_delay.as_nanos() as f64 * factor).round();

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0) as u64)
    }

    /// Every delay this policy will ever sleep, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(move |attempt| self.delay_for(attempt))
    }

    /// Worst-case time spent sleeping across all retries.
    pub fn total_delay(&self) -> Duration {
        self.delays().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_is_capped() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_multiplier(2.0);

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_total_delay() {
        let policy = RetryPolicy::default()
            .with_max_retries(3)
            .with_base_delay(Duration::from_millis(100))
            .with_multiplier(3.0);

        assert_eq!(policy.total_delay(), Duration::from_millis(100 + 300 + 900));
        assert_eq!(RetryPolicy::none().total_delay(), Duration::ZERO);
    }

    #[test]
    fn test_default_retryable_set() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(ErrorKind::RateLimited));
        assert!(policy.is_retryable(ErrorKind::Timeout));
        assert!(!policy.is_retryable(ErrorKind::AuthFailed));
        assert!(!policy.is_retryable(ErrorKind::NoDataFound));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_retries": 2, "base_delay": "50ms"}"#).unwrap();

        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(50));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert_eq!(policy.retryable, default_retryable());
    }
}
