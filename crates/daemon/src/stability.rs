//! Quiescence checking for recordings that may still be written.
//!
//! A file is considered stable once its last modification lies further in the
//! past than the stage's quiescence delay.

use std::time::{Duration, SystemTime};

/// Result of a quiescence check on a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityResult {
    /// Unmodified for longer than the delay.
    Stable,
    /// Modified too recently (or in the future).
    Unstable {
        /// Time elapsed since the last modification.
        age: Duration,
    },
}

/// Compare a file's modification time against `now` and the quiescence delay.
///
/// Stable only if `now - modified > delay`; a modification time in the future
/// counts as age zero.
#[inline]
pub fn check_quiescence(modified: SystemTime, now: SystemTime, delay: Duration) -> StabilityResult {
    let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
    if age > delay {
        StabilityResult::Stable
    } else {
        StabilityResult::Unstable { age }
    }
}

/// Convert a delay expressed in fractional days into a `Duration`.
///
/// Negative or non-finite values clamp to zero.
pub fn days_to_duration(days: f64) -> Duration {
    let secs = days * auto_transcode_config::SECS_PER_DAY;
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}
