//! Secure credential handling for scraping backends.
//!
//! API keys are wrapped in [`secrecy::SecretString`] as soon as they are
//! loaded. `Debug` and `Display` print `[REDACTED]`; the raw value is only
//! reachable through [`ApiCredential::expose`].
//!
//! ```ignore
//! let cred = ApiCredential::from_provider_config(&provider)?;
//! request.bearer_auth(cred.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use wayfinder_core::{ErrorKind, ProviderError};

use crate::config::ProviderConfig;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Environment variable named in the provider config
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely-stored API key for one provider.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    provider: String,
}

impl ApiCredential {
    pub fn new(
        value: impl Into<String>,
        source: CredentialSource,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            provider: provider.into(),
        }
    }

    /// Load a key from an environment variable.
    ///
    /// A missing or empty variable is an `AuthFailed` error so the tier
    /// never retries it.
    pub fn from_env(env_var: &str, provider: impl Into<String>) -> Result<Self, ProviderError> {
        let provider = provider.into();
        match std::env::var(env_var) {
            Ok(value) if !value.trim().is_empty() => {
                Ok(Self::new(value, CredentialSource::Environment, provider))
            }
            _ => Err(ProviderError::new(
                ErrorKind::AuthFailed,
                format!("API key for '{}' not set: configure '{}'", provider, env_var),
            )
            .with_provider(provider)),
        }
    }

    /// Load the key named by `api_key_env`; `None` when the provider needs no key.
    pub fn from_provider_config(config: &ProviderConfig) -> Result<Option<Self>, ProviderError> {
        config
            .api_key_env
            .as_deref()
            .map(|env_var| Self::from_env(env_var, config.name.clone()))
            .transpose()
    }

    /// Expose the key at the point of use. Never store the returned value.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("provider", &self.provider)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} key from {} [REDACTED]", self.provider, self.source)
    }
}
