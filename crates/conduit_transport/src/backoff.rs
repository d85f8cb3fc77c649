use std::sync::OnceLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;

/// Reconnect attempts allowed before the connection fails closed.
pub const MAX_RETRIES: u32 = 8;
/// Delay before the first reconnect attempt.
pub const BASE_DELAY_MS: u64 = 1_000;
/// Upper bound on the un-jittered delay.
pub const MAX_DELAY_MS: u64 = 30_000;
/// Jitter adds up to this fraction on top of the capped delay.
pub const MAX_JITTER: f64 = 0.3;

/// Exponential backoff with a cap and multiplicative jitter.
///
/// For retry attempt `n` (1-indexed):
/// `min(base * 2^(n-1), max) * (1 + jitter)` with `jitter` in `[0, max_jitter]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: f64,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
            max_jitter: MAX_JITTER,
            max_retries: MAX_RETRIES,
        }
    }
}

impl BackoffPolicy {
    /// Capped delay for `attempt` before jitter is applied.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let scaled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        scaled.min(self.max_delay)
    }

    /// Delay for `attempt` with an explicit jitter sample in `[0, 1]`.
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let jitter = sample.clamp(0.0, 1.0) * self.max_jitter;
        self.base_delay_for(attempt).mul_f64(1.0 + jitter)
    }

    /// Delay for `attempt` with random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(0.0..=1.0);
        self.delay_with_sample(attempt, sample)
    }

    /// True once `attempt` is past the retry budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_retries
    }
}

fn retryable_status_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)rate.?limit|overloaded|service.?unavailable|upstream.?connect|connection.?refused")
            .expect("retry regex must compile")
    })
}

/// Error text retry policy for transient failures and retryable statuses.
pub fn is_retryable_http_error(status: u16, error_text: &str) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504) || retryable_status_regex().is_match(error_text)
}

/// Un-jittered exponential delay for HTTP request retries (0-indexed).
pub fn http_retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.min(30)))
}
