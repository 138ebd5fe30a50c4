//! Reconnect timing policy

use std::time::Duration;

/// Fixed spacing between bounded manual reconnect attempts
pub const MANUAL_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Manual reconnect attempts before giving up
pub const MAX_MANUAL_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before the next automatic reconnect attempt.
///
/// `previous_attempts` counts attempts already made during the current
/// outage: the first retry fires immediately, subsequent retries back
/// off exponentially up to a 30 second cap.
pub fn auto_reconnect_delay(previous_attempts: u32) -> Duration {
    if previous_attempts == 0 {
        return Duration::ZERO;
    }
    let exp = previous_attempts.min(31);
    let millis = 1000u64.saturating_mul(1u64 << exp).min(30_000);
    Duration::from_millis(millis)
}
