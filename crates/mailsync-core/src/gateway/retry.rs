//! Retry policy for transient transport failures.
//!
//! Counters are kept per request URL. A URL is retried while its counter
//! is below the limit; the counter is cleared when the request succeeds or
//! fails terminally. Once part of a response has been received the request
//! is never retried.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use super::{GatewayError, GatewayResult};
use crate::SyncConfig;

/// Retry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Fixed delay before each retry.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay(),
        }
    }
}

/// Per-URL retry bookkeeping.
#[derive(Debug, Default)]
pub struct Retrier {
    policy: RetryPolicy,
    retried: Mutex<HashMap<String, u32>>,
}

impl Retrier {
    /// Creates a retrier with `policy`.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retried: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Decides whether the request to `url` that failed with `error` is
    /// retried, updating the counter for `url`.
    pub fn should_retry(&self, url: &str, error: &GatewayError) -> bool {
        let mut retried = self.retried.lock().unwrap_or_else(PoisonError::into_inner);

        let transient = match error {
            GatewayError::Transport(e) => e.is_transient() && !e.response_started,
            _ => false,
        };
        if !transient {
            retried.remove(url);
            return false;
        }

        let count = retried.entry(url.to_string()).or_insert(0);
        if *count < self.policy.max_retries {
            *count += 1;
            true
        } else {
            retried.remove(url);
            false
        }
    }

    /// Clears the counter for `url`.
    pub fn succeeded(&self, url: &str) {
        self.retried
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
    }

    /// Current retry count for `url`.
    #[must_use]
    pub fn retries(&self, url: &str) -> u32 {
        self.retried
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Runs `attempt` until it succeeds, fails non-transiently, or the
    /// retry budget for `url` is spent.
    ///
    /// # Errors
    ///
    /// Returns the last error from `attempt`.
    pub async fn run<T, F, Fut>(&self, url: &str, mut attempt: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        loop {
            match attempt().await {
                Ok(value) => {
                    self.succeeded(url);
                    return Ok(value);
                }
                Err(e) if self.should_retry(url, &e) => {
                    debug!(
                        "Retrying {} after {:?} (retry {}): {}",
                        url,
                        self.policy.delay,
                        self.retries(url),
                        e
                    );
                    tokio::time::sleep(self.policy.delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!("Giving up on {}: {}", url, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}
