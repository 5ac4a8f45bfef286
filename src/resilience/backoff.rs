//! Exponential backoff with optional jitter.

use rand::Rng;
use std::time::Duration;

/// Delay to wait after failed attempt `attempt` (1-indexed).
///
/// `base * multiplier^(attempt - 1)`, capped at `max`, plus up to 10% jitter
/// when requested.
pub fn calculate_backoff(
    attempt: u32,
    base: Duration,
    multiplier: f64,
    max: Option<Duration>,
    jitter: bool,
) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let factor = multiplier.max(1.0).powi(exponent);
    let raw_nanos = (base.as_nanos() as f64 * factor).round();

    let cap = max.unwrap_or(Duration::MAX);
    let delay = if raw_nanos.is_finite() && raw_nanos < u64::MAX as f64 {
        Duration::from_nanos(raw_nanos as u64).min(cap)
    } else {
        cap
    };

    if !jitter {
        return delay;
    }

    let range_ms = jitter_range_ms(delay);
    let jitter_ms = if range_ms > 0 {
        rand::thread_rng().gen_range(0..range_ms)
    } else {
        0
    };
    delay.saturating_add(Duration::from_millis(jitter_ms))
}

/// Upper bound of the jitter added to `delay`: 10% of it, in milliseconds.
fn jitter_range_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis() / 10).unwrap_or(u64::MAX)
}
