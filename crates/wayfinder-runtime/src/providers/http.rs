//! HTTP scraping backend.
//!
//! Speaks the common "POST {url, formats}" scrape API shape. Responses and
//! transport failures are mapped through the error normalizer so the pool
//! can fail over on rate limits and quota exhaustion.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};

use wayfinder_core::{ErrorKind, ProviderError};

use super::secrets::ApiCredential;
use super::{ScrapeBackend, ScrapeFormat, ScrapeOutput, DEFAULT_SOURCE_TIMEOUT};
use crate::config::ProviderConfig;

#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: [ScrapeFormat; 1],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeResponse {
    #[serde(default)]
    data: JsonValue,
    #[serde(default)]
    credits_used: Option<u32>,
}

/// A scraping provider reached over HTTP.
#[derive(Debug)]
pub struct HttpScrapeBackend {
    name: String,
    endpoint: String,
    credential: Option<ApiCredential>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpScrapeBackend {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        credential: Option<ApiCredential>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::new(ErrorKind::Unknown, e.to_string()))?;

        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            credential,
            timeout: DEFAULT_SOURCE_TIMEOUT,
            client,
        })
    }

    /// Build from a provider entry; the endpoint is required.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            ProviderError::new(
                ErrorKind::InvalidParams,
                format!("provider '{}' has no endpoint", config.name),
            )
        })?;
        let credential = ApiCredential::from_provider_config(config)?;
        Self::new(config.name.clone(), endpoint, credential)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        let normalized = if err.is_timeout() {
            ProviderError::timeout(self.timeout)
        } else if err.is_connect() || err.is_request() {
            ProviderError::network(err.to_string())
        } else if err.is_decode() {
            ProviderError::parse(err.to_string())
        } else {
            ProviderError::from_message(err.to_string())
        };
        normalized.with_provider(self.name.clone())
    }
}

#[async_trait]
impl ScrapeBackend for HttpScrapeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scrape(&self, url: &str, format: ScrapeFormat) -> Result<ScrapeOutput, ProviderError> {
        let started = Instant::now();

        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&ScrapeRequest {
                url,
                formats: [format],
            });
        // Only expose the key at the point of use
        if let Some(credential) = &self.credential {
            request = request.bearer_auth(credential.expose());
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(
                ProviderError::from_status(status.as_u16(), body).with_provider(self.name.clone())
            );
        }

        let body: ScrapeResponse = response.json().await.map_err(|e| self.transport_error(e))?;

        Ok(ScrapeOutput {
            data: body.data,
            credits_used: body.credits_used.unwrap_or(1),
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
