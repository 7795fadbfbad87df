//! L4Guard: per-IP connection caps, packet-rate limiting, and the IP
//! blocklist (§4.2).

use std::net::IpAddr;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::clock::Instant;
use crate::config::L4Config;
use crate::state::blocklist::Blocklist;
use crate::state::connection::ConnectionTable;
use crate::state::rate::RateTracker;
use crate::types::{PacketInfo, Verdict};

/// Connection/packet-rate enforcement for one IP address, shared by every
/// connection originating from it.
pub struct L4Guard {
    cfg: L4Config,
    connections: ConnectionTable,
    rates: DashMap<IpAddr, RateTracker>,
    blocklist: Blocklist,
}

impl L4Guard {
    pub fn new(cfg: L4Config) -> Self {
        Self {
            cfg,
            connections: ConnectionTable::new(),
            rates: DashMap::new(),
            blocklist: Blocklist::new(),
        }
    }

    pub fn config(&self) -> &L4Config {
        &self.cfg
    }

    /// A cheap, shared handle onto the blocklist L4Guard owns and sweeps.
    /// Handed to L7Guard and the AntiBot coordinator so a block either of
    /// them raises is immediately visible to `on_connect`/`on_packet`
    /// here (§4.4, §4.5 — every stage's failures feed the same blocklist
    /// L4 enforces against future connections).
    pub fn blocklist_handle(&self) -> Blocklist {
        self.blocklist.clone()
    }

    /// Whether `ip` is currently blocked, without mutating any state.
    pub fn is_blocked(&self, ip: IpAddr, now: Instant) -> bool {
        self.blocklist
            .is_blocked(ip, now, self.cfg.block_duration())
    }

    /// §4.2 `onConnect`.
    pub fn on_connect(&self, ip: IpAddr, now: Instant) -> Verdict {
        if self.is_blocked(ip, now) {
            return Verdict::DropSilent;
        }

        let count = self.connections.increment(ip, now);
        if count > self.cfg.max_connections_per_ip {
            // This caller alone observed the over-limit value; it alone is
            // responsible for blocking (§4.2 tie-break). A losing racer
            // that also exceeds the limit will see `is_blocked` true on
            // its own over-limit check. `block` clears the connection
            // record outright, so there is nothing to decrement here.
            self.block(ip, now);
            warn!(%ip, count, max = self.cfg.max_connections_per_ip, "connection limit exceeded, blocking");
            return Verdict::DropAndBlock;
        }

        Verdict::Allow
    }

    /// §4.2 `onPacket`.
    pub fn on_packet(&self, ip: IpAddr, packet: &PacketInfo, now: Instant) -> Verdict {
        if self.is_blocked(ip, now) {
            return Verdict::DropSilent;
        }

        if packet.frame_len > self.cfg.max_packet_size_or_default() {
            self.block(ip, now);
            warn!(%ip, size = packet.frame_len, "oversized packet, blocking");
            return Verdict::DropAndBlock;
        }

        let tracker = self
            .rates
            .entry(ip)
            .or_insert_with(|| RateTracker::new(now, self.cfg.rate_limit_window_ms));
        let obs = tracker.record(now);

        if obs.count > self.cfg.max_packets_per_second {
            drop(tracker);
            self.block(ip, now);
            warn!(%ip, count = obs.count, max = self.cfg.max_packets_per_second, "packet rate exceeded, blocking");
            return Verdict::DropAndBlock;
        }

        Verdict::Allow
    }

    /// §4.2 `onException`.
    pub fn on_exception(&self, ip: IpAddr, now: Instant) {
        let tracker = self
            .rates
            .entry(ip)
            .or_insert_with(|| RateTracker::new(now, self.cfg.rate_limit_window_ms));
        let errors = tracker.record_error();
        if errors > self.cfg.max_exceptions_per_window {
            drop(tracker);
            warn!(%ip, errors, "exception threshold exceeded, blocking");
            self.block(ip, now);
        }
    }

    /// §4.2 `onDisconnect`.
    pub fn on_disconnect(&self, ip: IpAddr) {
        self.connections.decrement(ip);
    }

    fn block(&self, ip: IpAddr, now: Instant) {
        self.blocklist.block(ip, now, self.cfg.block_duration());
        // Clear the connection/rate state to prevent it leaking for the
        // duration of the block (§4.2).
        self.connections.clear(ip);
        self.rates.remove(&ip);
    }

    pub fn connection_count(&self, ip: IpAddr) -> u32 {
        self.connections.count(ip)
    }

    /// Periodic maintenance: sweep expired blocklist entries and idle
    /// connection/rate records.
    pub fn sweep(&self, now: Instant) {
        self.blocklist.sweep_expired(now, self.cfg.block_duration());
        self.connections
            .sweep_idle(now, std::time::Duration::from_secs(30 * 60));
        self.rates.retain(|_, tracker| {
            !tracker.is_idle(now, std::time::Duration::from_secs(30 * 60))
        });
        debug!(
            blocked = self.blocklist.len(),
            tracked_ips = self.connections.len(),
            "L4Guard maintenance sweep complete"
        );
    }

    pub fn status(&self) -> L4Status {
        L4Status {
            blocked_ips: self.blocklist.len(),
            tracked_ips: self.connections.len(),
            rate_tracked_ips: self.rates.len(),
        }
    }
}

impl L4Config {
    fn max_packet_size_or_default(&self) -> usize {
        // L4 only validates an upper bound; `PacketFilter` owns the
        // configurable `max_packet_size` (§4.3). L4's bound exists purely
        // to reject absurd frames before they reach later stages.
        1024 * 1024
    }
}

#[derive(Debug, Clone, Copy)]
pub struct L4Status {
    pub blocked_ips: usize,
    pub tracked_ips: usize,
    pub rate_tracked_ips: usize,
}
