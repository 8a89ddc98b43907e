//! Error taxonomy and normalization.
//!
//! Providers fail in many shapes: HTTP status codes, transport errors,
//! malformed bodies, or bare strings from an SDK. Everything is folded into
//! [`ProviderError`], whose [`ErrorKind`] is a closed set with a static
//! retryable flag.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Closed classification of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    AuthFailed,
    InvalidKey,
    RateLimited,
    QuotaExceeded,
    InvalidParams,
    NotFound,
    ServiceUnavailable,
    NetworkError,
    Timeout,
    ParseError,
    NoDataFound,
    CacheError,
    Unknown,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::AuthFailed,
        ErrorKind::InvalidKey,
        ErrorKind::RateLimited,
        ErrorKind::QuotaExceeded,
        ErrorKind::InvalidParams,
        ErrorKind::NotFound,
        ErrorKind::ServiceUnavailable,
        ErrorKind::NetworkError,
        ErrorKind::Timeout,
        ErrorKind::ParseError,
        ErrorKind::NoDataFound,
        ErrorKind::CacheError,
        ErrorKind::Unknown,
    ];

    /// Whether a failure of this kind is worth retrying against the same provider.
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::ServiceUnavailable
                | ErrorKind::NetworkError
                | ErrorKind::Timeout
        )
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorKind::AuthFailed,
            402 => ErrorKind::QuotaExceeded,
            403 => ErrorKind::InvalidKey,
            404 => ErrorKind::NotFound,
            408 | 504 => ErrorKind::Timeout,
            429 => ErrorKind::RateLimited,
            400 | 422 => ErrorKind::InvalidParams,
            500..=599 => ErrorKind::ServiceUnavailable,
            400..=499 => ErrorKind::InvalidParams,
            _ => ErrorKind::Unknown,
        }
    }

    /// Classify a free-form failure message.
    ///
    /// An embedded status code (`"status 503"`, `"HTTP 429"`) wins over
    /// keyword matching.
    pub fn classify_message(message: &str) -> Self {
        if let Some(status) = embedded_status(message) {
            let kind = Self::from_status(status);
            if kind != ErrorKind::Unknown {
                return kind;
            }
        }

        MESSAGE_RULES
            .iter()
            .find(|(pattern, _)| pattern.is_match(message))
            .map(|(_, kind)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AuthFailed => "AUTH_FAILED",
            ErrorKind::InvalidKey => "INVALID_KEY",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::InvalidParams => "INVALID_PARAMS",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ParseError => "PARSE_ERROR",
            ErrorKind::NoDataFound => "NO_DATA_FOUND",
            ErrorKind::CacheError => "CACHE_ERROR",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

lazy_static! {
    static ref STATUS_IN_MESSAGE: Regex =
        Regex::new(r"(?i)\b(?:status|http)(?:\s+code)?[\s:=]*([1-5]\d{2})\b").unwrap();

    // Order matters: the first matching rule wins.
    static ref MESSAGE_RULES: Vec<(Regex, ErrorKind)> = vec![
        (
            Regex::new(
                r"(?i)invalid[\s_-]*(api[\s_-]*)?key|api[\s_-]*key[\s_-]*(invalid|revoked)",
            )
            .unwrap(),
            ErrorKind::InvalidKey,
        ),
        (
            Regex::new(r"(?i)unauthori[sz]ed|authentication|forbidden").unwrap(),
            ErrorKind::AuthFailed,
        ),
        (Regex::new(r"(?i)rate[\s_-]*limit|too many requests").unwrap(), ErrorKind::RateLimited),
        (
            Regex::new(
                r"(?i)quota|insufficient credits|credits? (exhausted|exceeded)|payment required",
            )
            .unwrap(),
            ErrorKind::QuotaExceeded,
        ),
        (Regex::new(r"(?i)timed?[\s_-]*out|deadline exceeded").unwrap(), ErrorKind::Timeout),
        (
            Regex::new(
                r"(?i)econnrefused|econnreset|enotfound|connection|network|dns|socket",
            )
            .unwrap(),
            ErrorKind::NetworkError,
        ),
        (
            Regex::new(r"(?i)unavailable|overloaded|bad gateway|internal server error").unwrap(),
            ErrorKind::ServiceUnavailable,
        ),
        (Regex::new(r"(?i)not[\s_-]*found").unwrap(), ErrorKind::NotFound),
        (
            Regex::new(r"(?i)parse|unexpected token|invalid json|deserializ|malformed").unwrap(),
            ErrorKind::ParseError,
        ),
        (
            Regex::new(r"(?i)invalid[\s_-]*param|bad request|missing (field|param)").unwrap(),
            ErrorKind::InvalidParams,
        ),
        (
            Regex::new(r"(?i)no (usable )?data|empty (result|response)").unwrap(),
            ErrorKind::NoDataFound,
        ),
    ];
}

fn embedded_status(message: &str) -> Option<u16> {
    STATUS_IN_MESSAGE
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// A normalized provider failure.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            provider: None,
        }
    }

    /// Failure carrying an HTTP status and (possibly empty) response body.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let mut kind = ErrorKind::from_status(status);

        // Some APIs answer 400/403 for exhausted quotas; trust the body then.
        if matches!(kind, ErrorKind::InvalidParams | ErrorKind::InvalidKey) {
            let hinted = ErrorKind::classify_message(&body);
            if matches!(hinted, ErrorKind::QuotaExceeded | ErrorKind::RateLimited) {
                kind = hinted;
            }
        }

        let message = if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body.trim())
        };

        Self {
            kind,
            message,
            status: Some(status),
            provider: None,
        }
    }

    /// Failure described only by a message; the kind is inferred from it.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = ErrorKind::classify_message(&message);
        Self::new(kind, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(ErrorKind::Timeout, format!("timed out after {:?}", after))
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    pub fn no_data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoDataFound, message)
    }

    /// Attach the provider that produced this failure.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Raw failure shapes observed at provider boundaries.
#[derive(Debug, Clone)]
pub enum RawFailure {
    Http { status: u16, body: String },
    Network(String),
    Timeout(Duration),
    Parse(String),
    Message(String),
}

impl From<RawFailure> for ProviderError {
    fn from(raw: RawFailure) -> Self {
        match raw {
            RawFailure::Http { status, body } => ProviderError::from_status(status, body),
            RawFailure::Network(msg) => ProviderError::network(msg),
            RawFailure::Timeout(after) => ProviderError::timeout(after),
            RawFailure::Parse(msg) => ProviderError::parse(msg),
            RawFailure::Message(msg) => ProviderError::from_message(msg),
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::parse(err.to_string())
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        ProviderError::new(io_error_kind(&err), err.to_string())
    }
}

fn io_error_kind(err: &std::io::Error) -> ErrorKind {
    use std::io::ErrorKind as Io;

    match err.kind() {
        Io::TimedOut | Io::WouldBlock => ErrorKind::Timeout,
        Io::ConnectionRefused
        | Io::ConnectionReset
        | Io::ConnectionAborted
        | Io::NotConnected
        | Io::AddrNotAvailable
        | Io::BrokenPipe
        | Io::UnexpectedEof => ErrorKind::NetworkError,
        Io::NotFound => ErrorKind::NotFound,
        Io::PermissionDenied => ErrorKind::AuthFailed,
        Io::InvalidData => ErrorKind::ParseError,
        Io::InvalidInput => ErrorKind::InvalidParams,
        _ => ErrorKind::classify_message(&err.to_string()),
    }
}

/// Normalize any error value.
///
/// Known concrete types are recognized directly; anything else is
/// classified by the messages along its source chain.
pub fn normalize(err: &(dyn std::error::Error + 'static)) -> ProviderError {
    if let Some(provider) = err.downcast_ref::<ProviderError>() {
        return provider.clone();
    }
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        return ProviderError::new(io_error_kind(io), io.to_string());
    }
    if err.downcast_ref::<serde_json::Error>().is_some() {
        return ProviderError::parse(err.to_string());
    }

    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        let kind = ErrorKind::classify_message(&e.to_string());
        if kind != ErrorKind::Unknown {
            return ProviderError::new(kind, err.to_string());
        }
        current = e.source();
    }

    ProviderError::new(ErrorKind::Unknown, err.to_string())
}
