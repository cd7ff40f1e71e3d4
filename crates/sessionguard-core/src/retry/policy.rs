use std::time::Duration;

use rand::Rng;

use super::ErrorKind;

/// Upper bound of the random offset added to every retry delay.
/// Spreads out retries from many clients reconnecting at the same moment.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

/// Exponent cap so `base * 2^(attempt-1)` cannot overflow.
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_JITTER)
    }
}

impl RetryPolicy {
    pub fn new(max_jitter: Duration) -> Self {
        Self { max_jitter }
    }

    pub fn without_jitter() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    /// Whether another call is allowed after `attempt` (1-based) failed with `kind`.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        kind.is_retryable() && attempt < kind.max_retries()
    }

    /// Deterministic part of the delay: `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        kind.base_delay().saturating_mul(1 << exponent)
    }

    /// Delay before the attempt following `attempt`, jitter included.
    pub fn retry_delay(&self, attempt: u32, kind: ErrorKind) -> Duration {
        self.backoff(attempt, kind) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}
