//! End-to-end encodings of the numbered scenarios in §8 of the design,
//! driven entirely through [`mc_sentinel::manager::SecurityManager`] and
//! its public [`PipelineEvents`] trait, the way an embedding proxy would.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use mc_sentinel::callbacks::{PacketSink, PipelineEvents};
use mc_sentinel::config::Config;
use mc_sentinel::manager::SecurityManager;
use mc_sentinel::types::{PacketInfo, PacketKind, Verdict};
use mc_sentinel::verify::SynthesizedPacket;

struct RecordingSink {
    writes: AtomicUsize,
    transfers: Mutex<Vec<Uuid>>,
    disconnects: Mutex<Vec<(Uuid, String)>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            writes: AtomicUsize::new(0),
            transfers: Mutex::new(Vec::new()),
            disconnects: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PacketSink for RecordingSink {
    async fn write_packet(&self, _player: Uuid, _packet: SynthesizedPacket) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
    async fn transfer_to_destination(&self, player: Uuid, _server_name: &str) {
        self.transfers.lock().unwrap().push(player);
    }
    async fn disconnect(&self, player: Uuid, reason: &str) {
        self.disconnects.lock().unwrap().push((player, reason.to_owned()));
    }
}

fn packet(kind: PacketKind) -> PacketInfo {
    PacketInfo::new(kind, 16, bytes::Bytes::new())
}

/// Scenario 1: connection flood.
#[tokio::test(start_paused = true)]
async fn scenario_1_connection_flood() {
    let mut cfg = Config::default();
    cfg.l4.max_connections_per_ip = 5;
    cfg.l4.block_duration_ms = 300_000;
    let manager = SecurityManager::new(cfg, std::sync::Arc::new(RecordingSink::new()));
    let ip: IpAddr = "203.0.113.7".parse().unwrap();

    for i in 1..=5 {
        assert_eq!(manager.on_accept(ip).await, Verdict::Allow, "connection {i}");
    }
    assert_eq!(manager.on_accept(ip).await, Verdict::DropAndBlock, "6th connection blocks");

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(
        manager.on_accept(ip).await,
        Verdict::DropSilent,
        "7th attempt a second later is silently dropped"
    );

    tokio::time::advance(Duration::from_secs(5 * 60)).await;
    assert_eq!(
        manager.on_accept(ip).await,
        Verdict::Allow,
        "a fresh attempt after the block window is accepted"
    );
}

/// Scenario 2: ping spam.
#[tokio::test]
async fn scenario_2_ping_spam() {
    let mut cfg = Config::default();
    cfg.l7.max_server_list_pings_per_ip = 3;
    let manager = SecurityManager::new(cfg, std::sync::Arc::new(RecordingSink::new()));
    let ip: IpAddr = "203.0.113.7".parse().unwrap();

    for i in 1..=3 {
        assert_eq!(
            manager.on_packet(ip, &packet(PacketKind::StatusPing)).await,
            Verdict::Allow,
            "ping {i}"
        );
    }
    assert_eq!(
        manager.on_packet(ip, &packet(PacketKind::StatusPing)).await,
        Verdict::DropAndBlock,
        "4th ping drops and blocks"
    );
}

/// Scenario 3: bot username pattern — kicked, session never created.
#[tokio::test]
async fn scenario_3_bot_username_pattern() {
    let mut cfg = Config::default();
    cfg.anti_bot.username_patterns = vec!["bot[0-9]+".to_owned()];
    cfg.anti_bot.kick_threshold = 1;
    let sink = std::sync::Arc::new(RecordingSink::new());
    let manager = SecurityManager::new(cfg, sink.clone());
    let ip: IpAddr = "203.0.113.7".parse().unwrap();

    let verdict = manager
        .on_login(Uuid::new_v4(), ip, "bot12345", None, None, 763, None)
        .await;
    assert!(matches!(verdict, mc_sentinel::types::LoginVerdict::Kick(_)));
    assert_eq!(sink.writes.load(Ordering::Relaxed), 0, "no verification world was entered");
}

/// Scenario 4: mini-world pass — natural movement resolves before the
/// deadline and the player is transferred.
#[tokio::test(start_paused = true)]
async fn scenario_4_mini_world_pass() {
    let mut cfg = Config::default();
    cfg.anti_bot.mini_world_duration_ms = 15_000;
    cfg.anti_bot.mini_world_min_movements = 3;
    cfg.anti_bot.mini_world_min_distance = 2.0;
    let sink = std::sync::Arc::new(RecordingSink::new());
    let manager = SecurityManager::new(cfg, sink.clone());
    let ip: IpAddr = "203.0.113.7".parse().unwrap();
    let player = Uuid::new_v4();

    let verdict = manager
        .on_login(player, ip, "RealPlayer", None, Some("play.example.com"), 763, Some(40))
        .await;
    assert_eq!(verdict, mc_sentinel::types::LoginVerdict::EnterVerification);

    let steps: [(f64, f64, f64, u64); 4] = [
        (1.0, 0.0, 1.0, 180),
        (2.0, 0.0, 1.4, 240),
        (1.6, 0.0, 0.6, 210),
        (1.2, 0.0, -0.6, 300),
    ];
    for (x, y, z, gap_ms) in steps {
        tokio::time::advance(Duration::from_millis(gap_ms)).await;
        manager
            .on_player_packet(player, &packet(PacketKind::PlayPosition { x, y, z }))
            .await;
    }

    tokio::time::advance(Duration::from_secs(15)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert_eq!(sink.transfers.lock().unwrap().len(), 1, "verified player was transferred");
    assert!(sink.disconnects.lock().unwrap().is_empty());
}

/// Scenario 5: mini-world fail — perfectly uniform bot-like timing fails
/// the natural-timing criterion at the deadline.
#[tokio::test(start_paused = true)]
async fn scenario_5_mini_world_fail_bot_timing() {
    let mut cfg = Config::default();
    cfg.anti_bot.mini_world_duration_ms = 15_000;
    let sink = std::sync::Arc::new(RecordingSink::new());
    let manager = SecurityManager::new(cfg, sink.clone());
    let ip: IpAddr = "203.0.113.7".parse().unwrap();
    let player = Uuid::new_v4();

    manager
        .on_login(player, ip, "RealPlayer", None, Some("play.example.com"), 763, Some(40))
        .await;

    for i in 0..10 {
        tokio::time::advance(Duration::from_millis(50)).await;
        manager
            .on_player_packet(player, &packet(PacketKind::PlayPosition { x: i as f64 * 0.5, y: 0.0, z: 0.0 }))
            .await;
    }

    tokio::time::advance(Duration::from_secs(15)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert!(sink.transfers.lock().unwrap().is_empty());
    assert_eq!(sink.disconnects.lock().unwrap().len(), 1, "bot-like timing was kicked at the deadline");
}

/// Scenario 6: repeated packet — the 5th identical packet drops, a
/// differing one right after is still accepted.
///
/// L7 enforces the `Handshake -> {Status | Login} -> Play -> Closed`
/// state machine on every packet it sees (§4.4), so the connection has to
/// legitimately reach `Play` before repeated Play-state traffic is a
/// meaningful test of the packet-filter's ring, the same as a real client
/// would. `Handshake`/`LoginStart` ride the packet filter's default
/// whitelist and never touch its repeated-packet ring.
#[tokio::test]
async fn scenario_6_repeated_packet() {
    let mut cfg = Config::default();
    cfg.packet_filter.repeated_packet_ring_capacity = 5;
    let manager = SecurityManager::new(cfg, std::sync::Arc::new(RecordingSink::new()));
    let ip: IpAddr = "203.0.113.7".parse().unwrap();

    assert_eq!(manager.on_packet(ip, &packet(PacketKind::Handshake)).await, Verdict::Allow);
    assert_eq!(manager.on_packet(ip, &packet(PacketKind::LoginStart)).await, Verdict::Allow);

    for i in 0..4 {
        assert_eq!(
            manager.on_packet(ip, &packet(PacketKind::Other("ChatMessage"))).await,
            Verdict::Allow,
            "packet {i}"
        );
    }
    assert_eq!(
        manager.on_packet(ip, &packet(PacketKind::Other("ChatMessage"))).await,
        Verdict::DropSilent,
        "5th identical packet drops"
    );
    assert_eq!(
        manager.on_packet(ip, &packet(PacketKind::PlayKeepAlive)).await,
        Verdict::Allow,
        "a differing packet type is still accepted"
    );
}
