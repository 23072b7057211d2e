use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)` (0-25% jitter)
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    let total_delay = delay_ms.saturating_add(jitter).min(max_ms);
    Duration::from_millis(total_delay)
}

/// Point in time after which the given failed attempt may be retried.
pub fn next_attempt_at(now: DateTime<Utc>, attempt: u32, base_ms: u64, max_ms: u64) -> DateTime<Utc> {
    let delay = calculate_backoff(attempt, base_ms, max_ms);
    now + chrono::Duration::milliseconds(delay.as_millis() as i64)
}
