//! Retrying invoker.
//!
//! Runs a fallible async call under a [`RetryPolicy`]: failures are
//! normalized into [`ProviderError`], retryable kinds are retried after a
//! capped exponential delay, and everything else stops immediately. The
//! caller always gets an [`Invocation`] back; nothing is raised past it.

use backon::{BackoffBuilder, Retryable};
use std::future::Future;
use std::time::Duration;

use wayfinder_core::{ProviderError, RetryPolicy};

/// Outcome of an invoked call with its retry history.
#[derive(Debug, Clone)]
pub struct Invocation<T> {
    pub outcome: Result<T, ProviderError>,

    /// Calls made, including the first
    pub attempts: u32,

    /// Delays slept between attempts, in order
    pub delays: Vec<Duration>,
}

impl<T> Invocation<T> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }

    pub fn into_result(self) -> Result<T, ProviderError> {
        self.outcome
    }
}

/// Yields exactly the delays of a [`RetryPolicy`].
#[derive(Debug, Clone)]
struct PolicyBackoff {
    policy: RetryPolicy,
}

#[derive(Debug)]
struct PolicyDelays {
    policy: RetryPolicy,
    retry: u32,
}

impl BackoffBuilder for PolicyBackoff {
    type Backoff = PolicyDelays;

    fn build(self) -> Self::Backoff {
        PolicyDelays {
            policy: self.policy,
            retry: 0,
        }
    }
}

impl Iterator for PolicyDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retry >= self.policy.max_retries {
            return None;
        }
        let delay = self.policy.delay_for(self.retry);
        self.retry += 1;
        Some(delay)
    }
}

/// Executes calls under a retry policy and an optional per-attempt timeout.
#[derive(Debug, Clone, Default)]
pub struct RetryInvoker {
    policy: RetryPolicy,
    attempt_timeout: Option<Duration>,
}

impl RetryInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt_timeout: None,
        }
    }

    /// Bound every single attempt; an elapsed attempt fails as `Timeout`.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `op` until it succeeds, fails with a non-retryable kind, or
    /// the retry budget runs out. `label` names the call in logs.
    pub async fn invoke<T, E, F, Fut>(&self, label: &str, mut op: F) -> Invocation<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ProviderError>,
    {
        let timeout = self.attempt_timeout;
        let mut attempts: u32 = 0;
        let mut delays: Vec<Duration> = Vec::new();

        let attempt = || {
            attempts += 1;
            let call = op();
            async move {
                let result: Result<T, ProviderError> = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, call).await {
                        Ok(result) => result.map_err(Into::into),
                        Err(_) => Err(ProviderError::timeout(limit)),
                    },
                    None => call.await.map_err(Into::into),
                };
                result
            }
        };

        let outcome = attempt
            .retry(PolicyBackoff {
                policy: self.policy.clone(),
            })
            .sleep(tokio::time::sleep)
            .when(|err: &ProviderError| self.policy.is_retryable(err.kind))
            .notify(|err: &ProviderError, delay: Duration| {
                delays.push(delay);
                tracing::warn!(
                    call = label,
                    kind = %err.kind,
                    retry = delays.len(),
                    delay = ?delay,
                    error = %err.message,
                    "retrying after failure"
                );
            })
            .await;

        if let Err(err) = &outcome {
            tracing::debug!(call = label, kind = %err.kind, attempts, "giving up");
        }

        Invocation {
            outcome,
            attempts,
            delays,
        }
    }
}
