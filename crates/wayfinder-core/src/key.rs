//! Canonical cache keys.
//!
//! Keys must not depend on how a caller spelled or ordered its input:
//! strings are trimmed, lower-cased and whitespace-collapsed, and interests
//! are treated as a set.

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::TripQuery;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

const FIELD_SEPARATOR: char = '|';
const NAMESPACE_SEPARATOR: char = ':';

/// Trim, lower-case and collapse inner whitespace.
pub fn normalize_component(value: &str) -> String {
    WHITESPACE
        .replace_all(value.trim(), " ")
        .to_lowercase()
}

/// Normalized, sorted, de-duplicated interests.
pub fn normalize_interests<S: AsRef<str>>(interests: &[S]) -> Vec<String> {
    let mut normalized: Vec<String> = interests
        .iter()
        .map(|i| normalize_component(i.as_ref()))
        .filter(|i| !i.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Canonical key over `(destination, origin, budget, interests, duration[, namespace])`.
pub fn generate_key<S: AsRef<str>>(
    destination: &str,
    origin: &str,
    budget: u32,
    interests: &[S],
    duration_days: u32,
    namespace: Option<&str>,
) -> String {
    let body = [
        normalize_component(destination),
        normalize_component(origin),
        budget.to_string(),
        normalize_interests(interests).join(","),
        duration_days.to_string(),
    ]
    .join(&FIELD_SEPARATOR.to_string());

    match namespace.map(normalize_component) {
        Some(ns) if !ns.is_empty() => format!("{}{}{}", ns, NAMESPACE_SEPARATOR, body),
        _ => body,
    }
}

/// Values that know their own cache key.
pub trait CacheKeySource {
    fn cache_key(&self, namespace: Option<&str>) -> String;
}

impl CacheKeySource for TripQuery {
    fn cache_key(&self, namespace: Option<&str>) -> String {
        generate_key(
            &self.destination,
            &self.origin,
            self.budget,
            &self.interests,
            self.duration_days,
            namespace,
        )
    }
}

impl CacheKeySource for str {
    fn cache_key(&self, namespace: Option<&str>) -> String {
        let body = normalize_component(self);
        match namespace.map(normalize_component) {
            Some(ns) if !ns.is_empty() => format!("{}{}{}", ns, NAMESPACE_SEPARATOR, body),
            _ => body,
        }
    }
}

impl CacheKeySource for String {
    fn cache_key(&self, namespace: Option<&str>) -> String {
        self.as_str().cache_key(namespace)
    }
}

impl<T: CacheKeySource + ?Sized> CacheKeySource for &T {
    fn cache_key(&self, namespace: Option<&str>) -> String {
        (**self).cache_key(namespace)
    }
}
