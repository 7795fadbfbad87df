//! `RecentPackets`: a fixed-capacity ring of the last N packet-type names
//! per IP, used by [`crate::packet_filter::PacketFilter`] to detect a
//! repeated-packet flood (§3, §4.3).

use std::net::IpAddr;
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::Instant;

struct Ring {
    slots: Vec<Option<String>>,
    next: usize,
    filled: usize,
    last_activity: Instant,
}

impl Ring {
    fn new(capacity: usize, now: Instant) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            next: 0,
            filled: 0,
            last_activity: now,
        }
    }

    fn push(&mut self, type_name: &str, now: Instant) -> bool {
        self.last_activity = now;
        self.slots[self.next] = Some(type_name.to_owned());
        self.next = (self.next + 1) % self.slots.len();
        self.filled = (self.filled + 1).min(self.slots.len());

        self.filled == self.slots.len()
            && self
                .slots
                .windows(2)
                .all(|w| w[0].is_some() && w[0] == w[1])
    }
}

/// Per-IP table of fixed-capacity repeated-packet rings.
pub struct RingTable {
    rings: DashMap<IpAddr, Ring>,
    capacity: usize,
}

impl RingTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            rings: DashMap::new(),
            capacity,
        }
    }

    /// Pushes `type_name` onto `ip`'s ring. Returns `true` if the ring is
    /// now full and every slot holds the same packet type (the repeated-
    /// packet violation condition).
    pub fn push(&self, ip: IpAddr, type_name: &str, now: Instant) -> bool {
        let mut entry = self
            .rings
            .entry(ip)
            .or_insert_with(|| Ring::new(self.capacity, now));
        entry.push(type_name, now)
    }

    pub fn remove(&self, ip: IpAddr) {
        self.rings.remove(&ip);
    }

    pub fn sweep_idle(&self, now: Instant, idle_after: Duration) {
        self.rings
            .retain(|_, ring| crate::clock::elapsed_since(now, ring.last_activity) < idle_after);
    }

    pub fn len(&self) -> usize {
        self.rings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeated_packet_trips_on_fifth_identical() {
        let table = RingTable::new(5);
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        let now = Instant::now();

        for i in 0..4 {
            let tripped = table.push(ip, "PlayerPosition", now);
            assert!(!tripped, "slot {i} should not trip yet");
        }
        let tripped = table.push(ip, "PlayerPosition", now);
        assert!(tripped, "5th identical packet fills the ring and trips");
    }

    #[tokio::test]
    async fn differing_packet_types_never_trip() {
        let table = RingTable::new(5);
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        let now = Instant::now();

        let kinds = ["A", "B", "A", "B", "A", "B", "A"];
        for k in kinds {
            assert!(!table.push(ip, k, now));
        }
    }

    #[tokio::test]
    async fn tripping_resets_by_continuing_to_push_differing_types() {
        let table = RingTable::new(3);
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        let now = Instant::now();

        assert!(!table.push(ip, "X", now));
        assert!(!table.push(ip, "X", now));
        assert!(table.push(ip, "X", now));
        // ring now holds [X, X, X] (accept pos 0 overwritten next); push a
        // different type and confirm it no longer reports all-equal.
        assert!(!table.push(ip, "Y", now));
    }
}
