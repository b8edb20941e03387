//! Retry policy with exponential backoff and jitter, plus deadline budgeting.

use std::time::Duration;

use rand::Rng;

/// Upstream statuses worth another attempt.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Base delay multiplied by `2^attempt`, in seconds.
const BACKOFF_BASE_SECS: f64 = 0.4;
/// Upper bound of the uniform jitter added to each delay, in seconds.
const BACKOFF_JITTER_SECS: f64 = 0.2;
/// No single delay exceeds this, in seconds.
const BACKOFF_CAP_SECS: f64 = 5.0;

/// Margin kept back from the invocation budget for building the response.
const RESPONSE_MARGIN_MILLIS: i64 = 1500;
const MIN_ATTEMPT_TIMEOUT_SECS: i64 = 3;
const MAX_ATTEMPT_TIMEOUT_SECS: i64 = 20;

pub fn is_retryable(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Delay before retry number `attempt` (0-based) given a jitter sample.
pub fn backoff_delay(attempt: u32, jitter_secs: f64) -> Duration {
    // beyond 2^4 the cap always wins; keep powi in range
    let factor = 2f64.powi(attempt.min(16) as i32);
    let secs = (factor * BACKOFF_BASE_SECS + jitter_secs).min(BACKOFF_CAP_SECS);
    Duration::from_secs_f64(secs.max(0.0))
}

/// [`backoff_delay`] with a fresh jitter sample in `[0, 0.2)` seconds.
pub fn jittered_backoff(attempt: u32) -> Duration {
    let jitter = rand::rng().random_range(0.0..BACKOFF_JITTER_SECS);
    backoff_delay(attempt, jitter)
}

/// Per-attempt timeout derived from the invocation's remaining budget.
///
/// `clamp((remaining - 1500ms) / 1s, 3s, 20s)`. In-flight attempts are not
/// cancelled when the outer budget runs out; they run to this timeout.
pub fn per_attempt_timeout(remaining_millis: i64) -> Duration {
    let secs = remaining_millis
        .saturating_sub(RESPONSE_MARGIN_MILLIS)
        .div_euclid(1000)
        .clamp(MIN_ATTEMPT_TIMEOUT_SECS, MAX_ATTEMPT_TIMEOUT_SECS);
    Duration::from_secs(secs as u64)
}

/// Retry bookkeeping for a single upstream call.
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Retries already spent.
    pub attempt: u32,
    pub max_retries: u32,
}

impl RetryState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            attempt: 0,
            max_retries,
        }
    }

    /// Delay before the next retry, or `None` once retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        let delay = jittered_backoff(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}
