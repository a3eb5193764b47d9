//! Monotonic time for the frame pipeline
//!
//! All timestamps are nanoseconds since a process-wide epoch so they can be
//! subtracted across threads and compared against vsync deadlines.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Nanoseconds in one millisecond.
pub const NANOS_PER_MILLI: i64 = 1_000_000;

/// Nanoseconds in one second.
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// 33.3ms, a 30Hz frame.
pub const LIGHT_TARGET_NANOS: i64 = 33_333_333;

/// 8.3ms, a 120Hz frame.
pub const HEAVY_TARGET_NANOS: i64 = 8_333_333;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Current monotonic time in nanoseconds.
pub fn now_nanos() -> i64 {
    to_nanos(epoch().elapsed())
}

/// Convert a duration to signed nanoseconds, saturating at `i64::MAX`.
pub fn to_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Frame period for a refresh rate in Hz.
pub fn frame_period(frame_rate: f32) -> Duration {
    if frame_rate <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(1.0 / f64::from(frame_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let a = now_nanos();
        let b = now_nanos();
        assert!(b >= a);
    }

    #[test]
    fn frame_period_matches_rate() {
        assert_eq!(frame_period(0.0), Duration::ZERO);
        let period = to_nanos(frame_period(120.0));
        assert!((period - HEAVY_TARGET_NANOS).abs() <= 1);
    }
}
