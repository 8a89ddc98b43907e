//! Per-provider credit accounting.
//!
//! Providers are kept in priority order. A credit is consumed for every
//! attempt that reaches a provider, whatever its outcome; counters only go
//! back up through an explicit reset.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// Credit accounting errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CreditError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider '{0}' declared twice")]
    DuplicateProvider(String),

    #[error("Provider '{0}' has no credits left")]
    Exhausted(String),
}

/// Snapshot of one provider's credits. `used + remaining == total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredit {
    pub total: u32,
    pub used: u32,
    pub remaining: u32,
}

#[derive(Debug)]
struct Account {
    name: String,
    total: u32,

    /// Never exceeds `total`
    used: AtomicU32,
}

impl Account {
    fn snapshot(&self) -> ProviderCredit {
        let used = self.used.load(Ordering::SeqCst);
        ProviderCredit {
            total: self.total,
            used,
            remaining: self.total - used,
        }
    }
}

/// Lock-free credit counters for an ordered set of providers.
#[derive(Debug)]
pub struct CreditLedger {
    accounts: Vec<Account>,
}

impl CreditLedger {
    /// Build a ledger from `(name, total)` pairs in priority order.
    pub fn new<I, S>(providers: I) -> Result<Self, CreditError>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut accounts: Vec<Account> = Vec::new();
        for (name, total) in providers {
            let name = name.into();
            if accounts.iter().any(|a| a.name == name) {
                return Err(CreditError::DuplicateProvider(name));
            }
            accounts.push(Account {
                name,
                total,
                used: AtomicU32::new(0),
            });
        }
        Ok(Self { accounts })
    }

    fn account(&self, name: &str) -> Result<&Account, CreditError> {
        self.accounts
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| CreditError::UnknownProvider(name.to_string()))
    }

    /// Provider names in priority order.
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.accounts.iter().map(|a| a.name.as_str())
    }

    /// Atomically take one credit from `name`.
    pub fn try_consume(&self, name: &str) -> Result<ProviderCredit, CreditError> {
        let account = self.account(name)?;
        let total = account.total;

        account
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < total).then_some(used + 1)
            })
            .map(|previous| ProviderCredit {
                total,
                used: previous + 1,
                remaining: total - previous - 1,
            })
            .map_err(|_| CreditError::Exhausted(name.to_string()))
    }

    /// Mark every remaining credit as used, e.g. after the provider
    /// reported its quota is gone.
    pub fn drain(&self, name: &str) -> Result<(), CreditError> {
        let account = self.account(name)?;
        account.used.store(account.total, Ordering::SeqCst);
        tracing::info!(provider = name, "provider credits drained");
        Ok(())
    }

    pub fn reset(&self, name: &str) -> Result<(), CreditError> {
        self.account(name)?.used.store(0, Ordering::SeqCst);
        tracing::info!(provider = name, "provider credits reset");
        Ok(())
    }

    pub fn reset_all(&self) {
        for account in &self.accounts {
            account.used.store(0, Ordering::SeqCst);
        }
    }

    /// True iff at least one provider has a credit left.
    pub fn is_available(&self) -> bool {
        self.accounts.iter().any(|a| a.snapshot().remaining > 0)
    }

    pub fn has_credits(&self, name: &str) -> bool {
        self.credit(name).map(|c| c.remaining > 0).unwrap_or(false)
    }

    pub fn credit(&self, name: &str) -> Option<ProviderCredit> {
        self.account(name).ok().map(Account::snapshot)
    }

    /// Every provider with its credits, in priority order.
    pub fn snapshot(&self) -> Vec<(String, ProviderCredit)> {
        self.accounts
            .iter()
            .map(|a| (a.name.clone(), a.snapshot()))
            .collect()
    }
}
