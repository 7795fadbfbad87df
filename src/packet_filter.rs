//! PacketFilter: size bounds, whitelist bypass, harmful-pattern matching,
//! and repeated-packet detection (§4.3).
//!
//! Rules run in order and the first match wins: whitelist accepts
//! immediately; harmful patterns and repeated packets drop; anything else
//! is accepted.
//!
//! PacketFilter never blocks an IP. It shares no blocklist handle with
//! [`crate::l4::L4Guard`] — scenario 6 requires that a dropped repeated
//! packet not prevent that same IP's next, differing packet from being
//! accepted, which a block would. Escalation to a block is L7Guard's and
//! AntiBot's job (§4.4, §4.5); PacketFilter only ever drops silently.

use std::net::IpAddr;
use std::time::Duration;

use regex::bytes::Regex as BytesRegex;
use tracing::debug;

use crate::clock::Instant;
use crate::config::PacketFilterConfig;
use crate::state::ring::RingTable;
use crate::types::{PacketInfo, Verdict};

pub struct PacketFilter {
    cfg: PacketFilterConfig,
    whitelist: Vec<String>,
    harmful_patterns: Vec<BytesRegex>,
    rings: RingTable,
}

impl PacketFilter {
    pub fn new(cfg: PacketFilterConfig, harmful_patterns: Vec<BytesRegex>) -> Self {
        let whitelist = cfg.whitelist.clone();
        let capacity = cfg.repeated_packet_ring_capacity;
        Self {
            cfg,
            whitelist,
            harmful_patterns,
            rings: RingTable::new(capacity),
        }
    }

    pub fn config(&self) -> &PacketFilterConfig {
        &self.cfg
    }

    pub fn check(&self, ip: IpAddr, packet: &PacketInfo, now: Instant) -> Verdict {
        if packet.frame_len > self.cfg.max_packet_size {
            debug!(%ip, size = packet.frame_len, "packet exceeds max size");
            return Verdict::DropSilent;
        }

        if self
            .whitelist
            .iter()
            .any(|name| name == packet.type_name())
        {
            return Verdict::Allow;
        }

        if self.cfg.block_harmful_patterns {
            if let Some(pattern) = self
                .harmful_patterns
                .iter()
                .find(|re| re.is_match(&packet.payload))
            {
                debug!(%ip, pattern = %pattern.as_str(), "harmful pattern matched");
                return Verdict::DropSilent;
            }
        }

        if self.cfg.block_repeated_packets
            && self.rings.push(ip, packet.type_name(), now)
        {
            debug!(%ip, kind = packet.type_name(), "repeated-packet flood detected");
            return Verdict::DropSilent;
        }

        Verdict::Allow
    }

    pub fn on_disconnect(&self, ip: IpAddr) {
        self.rings.remove(ip);
    }

    pub fn sweep(&self, now: Instant) {
        self.rings.sweep_idle(now, Duration::from_secs(5 * 60));
    }

    pub fn status(&self) -> PacketFilterStatus {
        PacketFilterStatus {
            tracked_ips: self.rings.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PacketFilterStatus {
    pub tracked_ips: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_harmful_patterns;
    use crate::types::PacketKind;
    use bytes::Bytes;

    fn bytes_patterns() -> Vec<BytesRegex> {
        default_harmful_patterns()
            .into_iter()
            .map(|re| BytesRegex::new(re.as_str()).unwrap())
            .collect()
    }

    fn pkt(name: &'static str, payload: &str) -> PacketInfo {
        PacketInfo::new(
            PacketKind::Other(name),
            payload.len(),
            Bytes::copy_from_slice(payload.as_bytes()),
        )
    }

    #[tokio::test]
    async fn whitelist_bypasses_everything() {
        let mut cfg = PacketFilterConfig::default();
        cfg.whitelist = vec!["Handshake".to_owned()];
        let filter = PacketFilter::new(cfg, bytes_patterns());
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        let p = pkt("Handshake", "'; DROP TABLE users; --");
        assert_eq!(filter.check(ip, &p, Instant::now()), Verdict::Allow);
    }

    #[tokio::test]
    async fn harmful_pattern_blocks() {
        let cfg = PacketFilterConfig {
            whitelist: vec![],
            ..PacketFilterConfig::default()
        };
        let filter = PacketFilter::new(cfg, bytes_patterns());
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        let p = pkt("ChatMessage", "../../etc/passwd");
        assert_eq!(filter.check(ip, &p, Instant::now()), Verdict::DropSilent);
    }

    #[tokio::test]
    async fn repeated_packet_scenario() {
        let cfg = PacketFilterConfig {
            whitelist: vec![],
            repeated_packet_ring_capacity: 5,
            ..PacketFilterConfig::default()
        };
        let filter = PacketFilter::new(cfg, bytes_patterns());
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        let now = Instant::now();

        for i in 0..4 {
            let p = pkt("ChatMessage", "hello");
            assert_eq!(filter.check(ip, &p, now), Verdict::Allow, "packet {i}");
        }
        let p = pkt("ChatMessage", "hello");
        assert_eq!(filter.check(ip, &p, now), Verdict::DropSilent);

        let different = pkt("KeepAlive", "ping");
        assert_eq!(filter.check(ip, &different, now), Verdict::Allow);
    }

    #[tokio::test]
    async fn oversized_packet_blocks_at_boundary() {
        let cfg = PacketFilterConfig {
            max_packet_size: 100,
            whitelist: vec![],
            ..PacketFilterConfig::default()
        };
        let filter = PacketFilter::new(cfg, bytes_patterns());
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        let at_limit = PacketInfo::new(PacketKind::Other("Chat"), 100, Bytes::new());
        assert_eq!(filter.check(ip, &at_limit, Instant::now()), Verdict::Allow);

        let over = PacketInfo::new(PacketKind::Other("Chat"), 101, Bytes::new());
        assert_eq!(filter.check(ip, &over, Instant::now()), Verdict::DropSilent);
    }
}
