//! `IPConnectionRecord`: the live-connection counter per source IP (§3).
//!
//! Invariant upheld by [`ConnectionTable`]: the counter for an IP exactly
//! equals the number of live pipelines holding it. `on_connect`/
//! `on_disconnect` are the only writers, and `on_disconnect` always removes
//! the record once the counter reaches zero — including on the exceptional
//! closure path, since callers are expected to call it from a single
//! `Drop`/cleanup point rather than ad hoc.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;

use crate::clock::Instant;

struct ConnectionRecord {
    count: AtomicU32,
    last_activity: Mutex<Instant>,
}

/// Concurrent per-IP connection-count table.
#[derive(Default)]
pub struct ConnectionTable {
    records: DashMap<IpAddr, ConnectionRecord>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Increments the counter for `ip`, creating the record if absent.
    /// Returns the counter's value *after* the increment, so the caller can
    /// make an atomic over-limit decision without a second lookup.
    pub fn increment(&self, ip: IpAddr, now: Instant) -> u32 {
        let entry = self
            .records
            .entry(ip)
            .or_insert_with(|| ConnectionRecord {
                count: AtomicU32::new(0),
                last_activity: Mutex::new(now),
            });
        *entry.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = now;
        entry.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the counter for `ip`. Removes the record once it reaches
    /// zero. No-op if the record does not exist (already removed, e.g. by
    /// the blocklist clearing it).
    pub fn decrement(&self, ip: IpAddr) {
        let should_remove = match self.records.get(&ip) {
            Some(rec) => {
                let prev = rec.count.fetch_sub(1, Ordering::AcqRel);
                prev <= 1
            }
            None => return,
        };
        if should_remove {
            // Compare-and-delete: only remove if still zero, guarding
            // against a racing `increment` that re-created interest in
            // this IP between our read above and the removal below.
            self.records.remove_if(&ip, |_, rec| rec.count.load(Ordering::Acquire) == 0);
        }
    }

    /// The current connection count for `ip` (0 if untracked).
    pub fn count(&self, ip: IpAddr) -> u32 {
        self.records
            .get(&ip)
            .map(|r| r.count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Removes the record for `ip` unconditionally. Used when an IP is
    /// blocked, to prevent the `ConnectionRecord` from leaking for the
    /// duration of the block (§4.2: "cleared to prevent leaks").
    pub fn clear(&self, ip: IpAddr) {
        self.records.remove(&ip);
    }

    /// Evicts records with zero connections whose last activity is older
    /// than `idle_after`. Called by the maintenance sweeper.
    pub fn sweep_idle(&self, now: Instant, idle_after: std::time::Duration) {
        self.records.retain(|_, rec| {
            let count = rec.count.load(Ordering::Acquire);
            if count != 0 {
                return true;
            }
            let last = *rec.last_activity.lock().unwrap_or_else(|e| e.into_inner());
            crate::clock::elapsed_since(now, last) < idle_after
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counter_tracks_live_pipelines() {
        let table = ConnectionTable::new();
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        let now = Instant::now();

        assert_eq!(table.increment(ip, now), 1);
        assert_eq!(table.increment(ip, now), 2);
        assert_eq!(table.count(ip), 2);

        table.decrement(ip);
        assert_eq!(table.count(ip), 1);

        table.decrement(ip);
        assert_eq!(table.count(ip), 0);
        // Record removed once it hits zero.
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn decrement_on_untracked_ip_is_a_no_op() {
        let table = ConnectionTable::new();
        let ip: IpAddr = "203.0.113.8".parse().unwrap();
        table.decrement(ip);
        assert_eq!(table.count(ip), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sweep_removes_only_zero_count_stale_entries() {
        let table = ConnectionTable::new();
        let busy: IpAddr = "203.0.113.9".parse().unwrap();
        let idle: IpAddr = "203.0.113.10".parse().unwrap();

        let t0 = Instant::now();
        table.increment(busy, t0);
        table.increment(idle, t0);
        table.decrement(idle);

        tokio::time::advance(std::time::Duration::from_secs(60)).await;
        let t1 = Instant::now();

        table.sweep_idle(t1, std::time::Duration::from_secs(30));

        assert_eq!(table.count(busy), 1, "busy IP is untouched by the sweep");
        assert!(table.records.get(&idle).is_none(), "idle zero-count IP is evicted");
    }
}
