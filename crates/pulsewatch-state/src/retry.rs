//! Bounded retry with exponential backoff for transient store failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::duration_str;
use crate::error::StateResult;

/// How often, and how patiently, a failing store operation is retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    #[serde(with = "duration_str")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_str")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before the given retry (1-based): doubles up to `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run `op`, retrying transient failures per `policy`.
///
/// Non-transient errors are returned immediately. The last transient error
/// is returned once attempts are exhausted. Backoff sleeps block the calling
/// thread; store operations are synchronous and the backoffs are short.
pub fn retry_transient<T>(
    policy: &RetryPolicy,
    what: &str,
    mut op: impl FnMut() -> StateResult<T>,
) -> StateResult<T> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                let backoff = policy.backoff(attempt);
                warn!(%what, attempt, ?backoff, error = %e, "transient store error, retrying");
                std::thread::sleep(backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
