//! `IPBlockEntry`: the temporary IP blocklist (§3, §4.2).
//!
//! An IP is blocked iff `now - blockedAt < blockDurationMs`. Expired
//! entries are removed lazily on lookup and swept periodically. Blocking
//! is idempotent: re-blocking an already-blocked IP does not change its
//! expiry (§8's round-trip property).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::{elapsed_since, Instant};

/// The blocklist is conceptually owned by [`crate::l4::L4Guard`] (it runs
/// the sweep), but §4.4 and §4.5 have L7Guard and the AntiBot coordinator
/// add entries to the *same* blocklist L4 consults on `onConnect`/
/// `onPacket` — otherwise a block raised by L7 would never actually stop a
/// future connection. `Blocklist` is therefore a cheap `Arc`-backed handle:
/// cloning it shares the one underlying map rather than owning state maps
/// redundantly per component.
#[derive(Clone)]
pub struct Blocklist {
    entries: Arc<DashMap<IpAddr, Instant>>,
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::new()
    }
}

impl Blocklist {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Blocks `ip` as of `now`, unless it is already blocked (idempotent:
    /// does not reset an in-progress block's expiry).
    pub fn block(&self, ip: IpAddr, now: Instant, duration: Duration) {
        self.entries.entry(ip).or_insert(now);
        let _ = duration; // duration is applied uniformly at lookup time, see `is_blocked`.
    }

    /// Whether `ip` is currently blocked, lazily evicting an expired entry.
    pub fn is_blocked(&self, ip: IpAddr, now: Instant, duration: Duration) -> bool {
        match self.entries.get(&ip) {
            Some(blocked_at) => {
                if elapsed_since(now, *blocked_at) < duration {
                    true
                } else {
                    drop(blocked_at);
                    self.entries.remove(&ip);
                    false
                }
            }
            None => false,
        }
    }

    /// Periodic sweep: evict every entry whose block has expired.
    pub fn sweep_expired(&self, now: Instant, duration: Duration) {
        self.entries
            .retain(|_, blocked_at| elapsed_since(now, *blocked_at) < duration);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unblock(&self, ip: IpAddr) {
        self.entries.remove(&ip);
    }
}
