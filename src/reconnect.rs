//! Optional exponential-backoff reconnect policy.
//!
//! Additive: `PortManager::acquire` stays a single-shot contract; this
//! module only decides *when* a caller (the watchdog's restart path, or a
//! future standalone reconnect loop) should try again after a failed
//! acquire, capped at `retry_delay_max_s` from config.

use std::time::Duration;

/// Computes the delay before the next acquire attempt, doubling each time
/// up to `max`. `attempt` is 0-based (the delay before the *first* retry).
pub fn backoff_delay(attempt: u32, max: Duration) -> Duration {
    let base = Duration::from_millis(250);
    let factor = 1u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX);
    base.saturating_mul(factor as u32).min(max)
}
