//! The clock used throughout the pipeline.
//!
//! We use [`tokio::time::Instant`] rather than [`std::time::Instant`]
//! everywhere a timestamp is taken. Outside of tests the two behave
//! identically; under `#[tokio::test(start_paused = true)]` with the
//! `test-util` feature, `tokio::time::Instant::now()` tracks the runtime's
//! paused clock, so scenarios like "a blocked IP is unblocked after
//! `blockDurationMs`" can be tested with `tokio::time::advance` instead of
//! a real 5-minute sleep.
//!
//! Subtraction between two `Instant`s never underflows (§5: "clock source
//! is monotonic; negative deltas are treated as zero") because we always
//! go through [`elapsed_since`], which saturates.

pub use tokio::time::Instant;
use tokio::time::Duration;

/// `now - earlier`, clamped to zero instead of panicking/underflowing if
/// `earlier` is (unexpectedly) in the future.
pub fn elapsed_since(now: Instant, earlier: Instant) -> Duration {
    now.checked_duration_since(earlier).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_since_clamps_negative_to_zero() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        assert_eq!(elapsed_since(now, later), Duration::ZERO);
    }
}
