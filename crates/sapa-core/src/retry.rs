use std::future::Future;
use std::time::Duration;

use crate::error::{Result, SapaError};

/// Timeout-and-retry wrapper for calls to remote model providers.
///
/// Each attempt is bounded by `timeout`. Provider failures (including
/// timeouts) are retried up to `retries` more times with exponential backoff
/// starting at `initial_backoff`. Any other error is returned immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, retries: u32, initial_backoff: Duration) -> Self {
        Self {
            timeout,
            retries,
            initial_backoff,
        }
    }

    /// Run `call` under this policy. `operation` names the call in logs and
    /// timeout errors.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.initial_backoff;
        let mut last_error = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                tracing::warn!(
                    operation,
                    attempt,
                    max_retries = self.retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Provider call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            let outcome = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(SapaError::Timeout {
                    operation: operation.to_string(),
                    secs: self.timeout.as_secs(),
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_provider() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| SapaError::Provider(format!("{}: retries exhausted", operation))))
    }
}
