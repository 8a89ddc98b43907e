//! Credit-limited scrape provider pool.
//!
//! Backends are tried in the ledger's priority order. Every attempt that
//! reaches a backend costs one credit. Failover rules:
//! - `RateLimited`: move on to the next backend.
//! - `QuotaExceeded`: drain the backend's local credits, then move on.
//! - anything else: stop and return that error.

use std::sync::Arc;
use thiserror::Error;

use wayfinder_core::{CreditError, CreditLedger, ErrorKind, ProviderError};

use super::{ScrapeBackend, ScrapeFormat, ScrapeOutput};

/// Errors from the pool.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("All scrape providers exhausted (tried: {})", tried.join(", "))]
    AllProvidersExhausted { tried: Vec<String> },

    #[error("Scrape backend '{0}' has no credit account")]
    UnknownProvider(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl From<PoolError> for ProviderError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Provider(inner) => inner,
            other => ProviderError::new(ErrorKind::QuotaExceeded, other.to_string()),
        }
    }
}

/// A successful scrape and the backend that served it.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolScrape {
    pub provider: String,
    pub output: ScrapeOutput,
}

/// Fails over between credit-limited scraping backends.
pub struct ScrapePool {
    ledger: Arc<CreditLedger>,

    /// In ledger priority order
    backends: Vec<Arc<dyn ScrapeBackend>>,
}

impl ScrapePool {
    /// Every backend must have an account in `ledger`. Accounts without a
    /// backend are ignored.
    pub fn new(
        ledger: Arc<CreditLedger>,
        backends: Vec<Arc<dyn ScrapeBackend>>,
    ) -> Result<Self, PoolError> {
        if let Some(orphan) = backends
            .iter()
            .find(|b| ledger.credit(b.name()).is_none())
        {
            return Err(PoolError::UnknownProvider(orphan.name().to_string()));
        }

        let ordered = ledger
            .providers()
            .filter_map(|name| backends.iter().find(|b| b.name() == name).cloned())
            .collect();

        Ok(Self {
            ledger,
            backends: ordered,
        })
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.ledger
    }

    /// True iff some backend still has credits.
    pub fn is_available(&self) -> bool {
        self.backends.iter().any(|b| self.ledger.has_credits(b.name()))
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.backends.iter().map(|b| b.name())
    }

    pub async fn scrape(&self, url: &str, format: ScrapeFormat) -> Result<PoolScrape, PoolError> {
        let mut tried = Vec::new();

        for backend in &self.backends {
            let name = backend.name();
            let credit = match self.ledger.try_consume(name) {
                Ok(credit) => credit,
                Err(CreditError::Exhausted(_)) => {
                    tracing::debug!(provider = name, "skipping provider without credits");
                    continue;
                }
                Err(err) => return Err(PoolError::Provider(credit_failure(name, err))),
            };
            tried.push(name.to_string());

            let limit = backend.timeout();
            let result = match tokio::time::timeout(limit, backend.scrape(url, format)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::timeout(limit)),
            };

            match result {
                Ok(output) => {
                    // The first credit was taken up front.
                    for _ in 1..output.credits_used {
                        if self.ledger.try_consume(name).is_err() {
                            break;
                        }
                    }
                    tracing::debug!(
                        provider = name,
                        remaining = self.ledger.credit(name).map(|c| c.remaining).unwrap_or(0),
                        credits_used = output.credits_used,
                        processing_time_ms = output.processing_time_ms,
                        "scrape succeeded"
                    );
                    return Ok(PoolScrape {
                        provider: name.to_string(),
                        output,
                    });
                }
                Err(err) if err.kind == ErrorKind::RateLimited => {
                    tracing::warn!(
                        provider = name,
                        remaining = credit.remaining,
                        "provider rate limited, failing over"
                    );
                }
                Err(err) if err.kind == ErrorKind::QuotaExceeded => {
                    // Provider-side quota is gone regardless of our count.
                    if let Err(e) = self.ledger.drain(name) {
                        tracing::warn!(provider = name, error = %e, "failed to drain credits");
                    }
                    tracing::warn!(provider = name, "provider quota exceeded, failing over");
                }
                Err(err) => return Err(PoolError::Provider(err.with_provider(name))),
            }
        }

        tracing::warn!(tried = ?tried, "all scrape providers exhausted");
        Err(PoolError::AllProvidersExhausted { tried })
    }
}

fn credit_failure(provider: &str, err: CreditError) -> ProviderError {
    ProviderError::new(ErrorKind::Unknown, err.to_string()).with_provider(provider)
}
