use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::store::StoreError;

/// Bounded exponential backoff applied to transient store failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; zero disables retrying.
    pub max_retries: u32,
    pub backoff: Duration,
    pub backoff_factor: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(200),
            backoff_factor: 2,
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let multiplier = self.backoff_factor.max(1).saturating_pow(exponent);
        self.backoff
            .saturating_mul(multiplier)
            .min(self.max_backoff)
    }
}

#[derive(Debug)]
pub(crate) enum RetryError {
    Store { source: StoreError, attempts: u32 },
    Cancelled,
}

/// Run `call` until it succeeds, fails permanently, or the retry budget is spent.
///
/// A cancelled token stops the loop between attempts; an attempt already in flight is
/// allowed to finish.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    cancel: Option<&CancellationToken>,
    mut call: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(source) if source.is_transient() && attempts <= policy.max_retries => {
                let delay = policy.delay_for(attempts);
                warn!(operation, attempts, ?delay, error = %source, "retrying store call");
                match cancel {
                    Some(token) => {
                        tokio::select! {
                            _ = token.cancelled() => return Err(RetryError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
            Err(source) => return Err(RetryError::Store { source, attempts }),
        }
    }
}
