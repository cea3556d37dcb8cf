//! Poll pacing.

use rand::Rng;
use std::time::Duration;

/// `interval` moved by a uniform random offset in `[-jitter, +jitter]`.
pub(crate) fn jittered(interval: Duration, jitter: Duration, rng: &mut impl Rng) -> Duration {
    if jitter.is_zero() {
        return interval;
    }

    let jitter_ms = jitter.as_millis() as i64;
    let offset = rng.gen_range(-jitter_ms..=jitter_ms);
    let delay_ms = (interval.as_millis() as i64).saturating_add(offset).max(0);
    Duration::from_millis(delay_ms as u64)
}

/// Pause after `consecutive` store errors in a row.
///
/// `base * 2^(consecutive - 1)` capped at `max`; zero when there were none.
pub(crate) fn error_backoff(consecutive: u32, base: Duration, max: Duration) -> Duration {
    if consecutive == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let multiplier = 1u64.checked_shl(consecutive - 1).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(multiplier).min(max_ms))
}
