use std::{future::Future, time::Duration};

use super::RpcError;

/// Capped exponential backoff: `min(cap, base * 2^attempt)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base: Duration::from_millis(200), cap: Duration::from_secs(5), max_attempts: 5 }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given zero-based failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Unbounded backoff sharing this policy's base and cap.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff::new(*self)
    }
}

/// Runs `op` again after each transient failure, up to `retries` extra attempts spaced
/// by `policy`. `on_retry` sees the attempt number, the delay about to be slept and the
/// error.
///
/// # Errors
///
/// The first permanent error, or the last transient one once retries run out.
pub async fn retry_transient<T, Fut>(
    policy: &RetryPolicy,
    retries: u32,
    mut op: impl FnMut() -> Fut,
    mut on_retry: impl FnMut(u32, Duration, &RpcError),
) -> Result<T, RpcError>
where
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < retries => {
                let delay = policy.delay_for(attempt);
                attempt += 1;
                on_retry(attempt, delay, &e);
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

/// Stateful backoff for loops that retry forever, such as feed reconnection.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Returns the next delay and advances.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
