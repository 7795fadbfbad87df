//! `RateTracker`: the sliding-window packet-rate counter (§3, §4.2).
//!
//! Invariant: the window start is monotone non-decreasing, and at every
//! observation `0 <= count <= limit + 1` within the active window — the
//! `+1` is the caller's own increment that discovered the over-limit
//! condition; it is on the caller to act on that (drop + block) rather
//! than silently absorb it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::clock::Instant;

/// A single sliding window over packet counts, reset wholesale once its
/// width elapses. One `RateTracker` is shared by all callers racing to
/// increment it; [`RateTracker::record`] is the only mutator and is safe to
/// call concurrently.
pub struct RateTracker {
    window_start: Mutex<Instant>,
    count: AtomicU32,
    error_count: AtomicU32,
    window_ms: u64,
}

/// Outcome of recording one packet against the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateObservation {
    /// The packet count in the window *after* this packet was recorded.
    pub count: u32,
    /// Whether the window was just reset to make room for this packet.
    pub window_reset: bool,
}

impl RateTracker {
    pub fn new(now: Instant, window_ms: u64) -> Self {
        Self {
            window_start: Mutex::new(now),
            count: AtomicU32::new(0),
            error_count: AtomicU32::new(0),
            window_ms,
        }
    }

    /// Records one packet arrival at `now`, resetting the window first if
    /// it has aged out. Returns the post-increment count.
    pub fn record(&self, now: Instant) -> RateObservation {
        let mut reset = false;
        {
            let mut start = self.window_start.lock().unwrap_or_else(|e| e.into_inner());
            let age = crate::clock::elapsed_since(now, *start);
            if age.as_millis() as u64 >= self.window_ms {
                *start = now;
                self.count.store(0, Ordering::Release);
                reset = true;
            }
        }
        let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        RateObservation {
            count,
            window_reset: reset,
        }
    }

    /// Current count without recording a new packet.
    pub fn current_count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Records a caught exception, returning the post-increment error
    /// count within the current window.
    pub fn record_error(&self) -> u32 {
        self.error_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Acquire)
    }

    pub fn window_start(&self) -> Instant {
        *self.window_start.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether this tracker has seen no activity since `now - idle_after`.
    pub fn is_idle(&self, now: Instant, idle_after: std::time::Duration) -> bool {
        crate::clock::elapsed_since(now, self.window_start()) >= idle_after
    }
}
