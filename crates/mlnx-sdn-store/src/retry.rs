//! Bounded retry of transient storage failures.
//!
//! Every mutating store operation runs its transaction through
//! [`with_retries`], which re-runs the whole transaction while the error
//! classifier says the failure is transient.

use std::time::Duration;

use crate::error::{Result, StoreError};

/// How many times, and how patiently, to re-run a failed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Sleep before attempt `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_millis(5),
        }
    }
}

/// Run `op` until it succeeds, fails with an error `is_retriable` rejects, or
/// the attempt budget is spent.
///
/// # Errors
///
/// Returns the first non-retriable error unchanged, or
/// `StoreError::RetriesExhausted` carrying the last transient error.
pub fn with_retries<T, C, F>(
    policy: &RetryPolicy,
    operation: &'static str,
    is_retriable: C,
    mut op: F,
) -> Result<T>
where
    C: Fn(&StoreError) -> bool,
    F: FnMut() -> Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if is_retriable(&e) => {
                if attempt >= max_attempts {
                    tracing::error!(operation, attempts = attempt, error = %e, "Giving up on transient store error");
                    return Err(StoreError::RetriesExhausted {
                        operation,
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                tracing::debug!(operation, attempt, error = %e, "Retrying transient store error");
                std::thread::sleep(policy.backoff * attempt);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
