//! Bounded retry with a fixed delay between attempts.
//!
//! Every remote call made during a migration goes through [`RetryPolicy::execute`].
//! Only errors that report themselves as transient are retried, anything else fails on
//! the first attempt. When the attempts run out the last error is handed back inside
//! [`RetryError::Exhausted`] so the caller decides whether to log it, skip the item or
//! escalate.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

/// Errors that know whether trying again could help.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },
    /// The operation failed with an error that retrying can not fix.
    #[error("{0}")]
    Permanent(#[source] E),
}

impl<E> RetryError<E> {
    /// The error returned by the final attempt.
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Permanent(e) => e,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or `max_attempts` is reached.
    ///
    /// * `operation`: Name of the operation used in log lines.
    /// * `op`: Produces a fresh attempt each time it is called.
    pub async fn execute<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match op().await {
                Ok(val) => return Ok(val),
                Err(e) => e,
            };

            if !err.is_transient() {
                warn!(operation, attempt, "Not retrying {}: {}", operation, err);
                return Err(RetryError::Permanent(err));
            }

            warn!(operation, attempt, max_attempts, "Retrying due to: {}, attempt {}/{}", err, attempt, max_attempts);

            if attempt >= max_attempts {
                error!(operation, "Function {} failed after {} retries", operation, max_attempts);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            tokio::time::sleep(self.delay).await;
        }
    }
}
