//! Bounded retries with exponential backoff and jitter
//!
//! Attempt n (0-based) that fails sleeps `delay * 2^n` plus uniform jitter in
//! `[0, max_jitter)` before the next attempt. Only the last error is kept. The
//! cancellation token is checked before every attempt and races every sleep.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayType {
    Fixed,
    BackOff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until success or cancellation.
    pub max_attempts: Option<u32>,
    pub delay: Duration,
    pub delay_type: DelayType,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// Policy for ordinary request/response calls.
    pub fn default_call() -> Self {
        Self {
            max_attempts: Some(3),
            delay: Duration::from_millis(200),
            delay_type: DelayType::BackOff,
            max_jitter: Duration::from_millis(333),
        }
    }

    /// Longer budget for order cancellation.
    pub fn cancel() -> Self {
        Self {
            max_attempts: Some(5),
            delay: Duration::from_millis(200),
            delay_type: DelayType::BackOff,
            max_jitter: Duration::from_secs(1),
        }
    }

    /// Stream reconnection.
    pub fn reconnect() -> Self {
        Self {
            max_attempts: Some(3),
            delay: Duration::from_secs(2),
            delay_type: DelayType::BackOff,
            max_jitter: Duration::from_secs(1),
        }
    }

    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration, delay_type: DelayType) -> Self {
        self.delay = delay;
        self.delay_type = delay_type;
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Delay before the attempt following failed attempt `attempt` (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match self.delay_type {
            DelayType::Fixed => self.delay,
            DelayType::BackOff => {
                let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor)
            }
        }
    }

    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max = self.max_jitter.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..max.max(1)))
        };
        self.base_delay(attempt) + jitter
    }

    fn allows(&self, attempts_made: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts_made < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_call()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Failed(e) => Some(e),
        }
    }
}

/// Sleep for `duration` unless `token` is cancelled first. Returns false on cancellation.
pub async fn sleep_or_cancelled(token: &CancellationToken, duration: Duration) -> bool {
    if token.is_cancelled() {
        return false;
    }
    monoio::select! {
        _ = monoio::time::sleep(duration) => true,
        _ = token.cancelled() => false,
    }
}

/// Run `op` until it succeeds, `retry_if` rejects its error, attempts run out or the
/// token is cancelled. The attempt number (0-based) is passed to `op`.
pub async fn retry<T, E, Op, Fut, P>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    retry_if: P,
    mut op: Op,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        attempt += 1;
        if !retry_if(&err) || !policy.allows(attempt) {
            return Err(RetryError::Failed(err));
        }

        let delay = policy.delay_with_jitter(attempt - 1);
        debug!("🔁 attempt {} failed: {}, retrying in {:?}", attempt, err, delay);
        if !sleep_or_cancelled(token, delay).await {
            return Err(RetryError::Cancelled);
        }
    }
}

/// `retry` with every error considered retryable.
pub async fn retry_all<T, E, Op, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    op: Op,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry(policy, token, |_| true, op).await
}
