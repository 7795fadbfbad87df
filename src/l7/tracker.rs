//! `ClientTracker`: per-IP L7 bookkeeping (§3, §4.4).
//!
//! All the packet-type counts share one reset clock: "packet-type counts
//! are cleared whenever `now - lastReset >= 1s`" is the *whole map*
//! resetting together, not each key aging out independently, so the type
//! counts and their reset clock live behind one lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::clock::{elapsed_since, Instant};
use crate::types::ConnectionState;

struct TypeCounts {
    counts: HashMap<String, u32>,
    last_reset: Instant,
}

pub struct ClientTracker {
    type_counts: Mutex<TypeCounts>,
    login_attempts: AtomicU32,
    login_window: Mutex<Instant>,
    login_window_ms: u64,
    ping_count: AtomicU32,
    exception_count: AtomicU32,
    exception_window: Mutex<Instant>,
    total_packets: AtomicU64,
    last_activity: Mutex<Instant>,
    state: Mutex<ConnectionState>,
}

impl ClientTracker {
    pub fn new(now: Instant, login_window_ms: u64) -> Self {
        Self {
            type_counts: Mutex::new(TypeCounts {
                counts: HashMap::new(),
                last_reset: now,
            }),
            login_attempts: AtomicU32::new(0),
            login_window: Mutex::new(now),
            login_window_ms,
            ping_count: AtomicU32::new(0),
            exception_count: AtomicU32::new(0),
            exception_window: Mutex::new(now),
            total_packets: AtomicU64::new(0),
            last_activity: Mutex::new(now),
            state: Mutex::new(ConnectionState::Handshake),
        }
    }

    /// Records one packet of `type_name`, resetting the whole per-type
    /// count table first if its 1-second window has elapsed. Returns the
    /// post-increment count for `type_name`.
    pub fn record_type(&self, type_name: &str, now: Instant) -> u32 {
        self.total_packets.fetch_add(1, Ordering::Relaxed);
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = now;

        let mut guard = self.type_counts.lock().unwrap_or_else(|e| e.into_inner());
        if elapsed_since(now, guard.last_reset).as_millis() as u64 >= 1000 {
            guard.counts.clear();
            guard.last_reset = now;
        }
        let count = guard.counts.entry(type_name.to_owned()).or_insert(0);
        *count += 1;
        *count
    }

    /// Records a login/encryption packet, resetting the login-attempt
    /// window if it has aged out. Returns the post-increment count.
    pub fn record_login_attempt(&self, now: Instant) -> u32 {
        let mut window = self.login_window.lock().unwrap_or_else(|e| e.into_inner());
        if elapsed_since(now, *window).as_millis() as u64 >= self.login_window_ms {
            *window = now;
            self.login_attempts.store(0, Ordering::Release);
        }
        self.login_attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Records a server-list-ping style packet. Counts for the life of the
    /// tracker (evicted with the whole record on idle timeout).
    pub fn record_ping(&self) -> u32 {
        self.ping_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_exception(&self, now: Instant) -> u32 {
        let mut window = self
            .exception_window
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if elapsed_since(now, *window).as_millis() as u64 >= 1000 {
            *window = now;
            self.exception_count.store(0, Ordering::Release);
        }
        self.exception_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_state(&self, next: ConnectionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets.load(Ordering::Relaxed)
    }

    pub fn is_idle(&self, now: Instant, idle_after: std::time::Duration) -> bool {
        let last = *self.last_activity.lock().unwrap_or_else(|e| e.into_inner());
        elapsed_since(now, last) >= idle_after
    }
}
