//! L7Guard: protocol-state and pattern enforcement above L4 (§4.4).
//!
//! Checks run in a fixed order and the first failure wins: packet-type
//! rate, login attempts, server-list pings, protocol-state violations,
//! then (on a separate call) exception accounting. Every failure is
//! fail-fast DROP-and-block — L7Guard shares L4Guard's blocklist so a
//! block it raises is visible to the next `onConnect`/`onPacket` there.

mod tracker;

use std::net::IpAddr;
use std::time::Duration;

use dashmap::DashMap;
use tracing::warn;

use crate::clock::Instant;
use crate::config::L7Config;
use crate::state::blocklist::Blocklist;
use crate::types::{ConnectionState, PacketInfo, Verdict};

pub use tracker::ClientTracker;

pub struct L7Guard {
    cfg: L7Config,
    clients: DashMap<IpAddr, ClientTracker>,
    blocklist: Blocklist,
    block_duration: Duration,
}

impl L7Guard {
    /// `block_duration` is L4's shared blocklist expiry (§4.2) — L7Guard
    /// adds to the same blocklist L4Guard sweeps and must agree with it on
    /// how long an entry stays live.
    pub fn new(cfg: L7Config, blocklist: Blocklist, block_duration: Duration) -> Self {
        Self {
            cfg,
            clients: DashMap::new(),
            blocklist,
            block_duration,
        }
    }

    pub fn config(&self) -> &L7Config {
        &self.cfg
    }

    /// §4.4 `onPacket`: packet-type rate, login attempts, server-list
    /// pings, then protocol-state validation, in that order.
    pub fn on_packet(&self, ip: IpAddr, packet: &PacketInfo, now: Instant) -> Verdict {
        if self.blocklist.is_blocked(ip, now, self.block_duration) {
            return Verdict::DropSilent;
        }

        let tracker = self
            .clients
            .entry(ip)
            .or_insert_with(|| ClientTracker::new(now, self.block_duration.as_millis() as u64));

        let type_name = packet.type_name();

        let type_count = tracker.record_type(type_name, now);
        if type_count > self.cfg.max_packet_type_per_second {
            drop(tracker);
            warn!(%ip, kind = type_name, count = type_count, "packet-type rate exceeded, blocking");
            self.block(ip, now);
            return Verdict::DropAndBlock;
        }

        if type_name.contains("Login") || type_name.contains("Encryption") {
            let attempts = tracker.record_login_attempt(now);
            if attempts > self.cfg.max_login_attempts_per_ip {
                drop(tracker);
                warn!(%ip, attempts, "login attempt limit exceeded, blocking");
                self.block(ip, now);
                return Verdict::DropAndBlock;
            }
        }

        if type_name.contains("Ping") || type_name == "StatusRequest" {
            let pings = tracker.record_ping();
            if pings > self.cfg.max_server_list_pings_per_ip {
                drop(tracker);
                warn!(%ip, pings, "server-list ping limit exceeded, blocking");
                self.block(ip, now);
                return Verdict::DropAndBlock;
            }
        }

        if self.cfg.detect_protocol_violations {
            let expected = packet.kind.expected_state();
            let current = tracker.state();
            if !current.can_transition_to(expected) {
                warn!(%ip, ?current, ?expected, "protocol-state violation, blocking");
                drop(tracker);
                self.block(ip, now);
                return Verdict::DropAndBlock;
            }
            tracker.set_state(expected);
        }

        Verdict::Allow
    }

    /// §4.4 `onException`: a separate 1s-windowed exception counter per IP.
    pub fn on_exception(&self, ip: IpAddr, now: Instant) {
        let tracker = self
            .clients
            .entry(ip)
            .or_insert_with(|| ClientTracker::new(now, self.block_duration.as_millis() as u64));
        let errors = tracker.record_exception(now);
        if errors > self.cfg.max_exceptions_per_window {
            drop(tracker);
            warn!(%ip, errors, "L7 exception threshold exceeded, blocking");
            self.block(ip, now);
        }
    }

    /// Marks the connection closed in its tracked state machine, if any.
    pub fn on_disconnect(&self, ip: IpAddr) {
        if let Some(tracker) = self.clients.get(&ip) {
            tracker.set_state(ConnectionState::Closed);
        }
    }

    fn block(&self, ip: IpAddr, now: Instant) {
        self.blocklist.block(ip, now, self.block_duration);
        self.clients.remove(&ip);
    }

    pub fn sweep(&self, now: Instant) {
        self.clients
            .retain(|_, tracker| !tracker.is_idle(now, Duration::from_secs(30 * 60)));
    }

    pub fn status(&self) -> L7Status {
        L7Status {
            tracked_ips: self.clients.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct L7Status {
    pub tracked_ips: usize,
}
