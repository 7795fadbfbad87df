//! VirtualVerificationWorld (§4.6): synthesizes a minimal game world
//! inside the proxy to decide whether a login is a human before the
//! outer proxy transfers the connection to its real destination.

mod join_encoder;
mod judge;

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::callbacks::PacketSink;
use crate::clock::{elapsed_since, Instant};
use crate::config::AntiBotConfig;
use crate::error::VerificationError;
use crate::types::PacketKind;

pub use join_encoder::{
    encoder_for_protocol_version, Difficulty, GameMode, JoinEncoder, JoinParams,
};
pub use judge::MovementDelta;

/// Re-exported so [`crate::callbacks::PacketSink`] can name it without a
/// circular `pub use`.
pub use join_encoder::SynthesizedPacket;

/// Entity ids are assigned from a reserved high range to avoid colliding
/// with anything the real backend later assigns the client (§4.6).
const ENTITY_ID_BASE: i64 = 1_000_000;

/// The small callback interface AntiBot hands to the verification world,
/// breaking the cyclic reference a back-pointer to the whole AntiBot
/// coordinator would create (§9's design note).
pub trait VerificationOutcomeSink: Send + Sync {
    fn mark_verified(&self, player: Uuid);
    fn kick(&self, player: Uuid, reason: String);
}

struct MovementLog {
    deltas: Vec<MovementDelta>,
    /// Millisecond gaps between consecutive movement packets.
    interval_ms: Vec<f64>,
    last_timestamp: Option<Instant>,
}

/// Per-player verification-session state. Mutated only by the owning
/// connection's read pipeline (§5's concurrency model); the
/// deadline-resolution path uses `resolved` to guard against racing with
/// an early pass.
pub struct VirtualPlayer {
    #[allow(dead_code)]
    uuid: Uuid,
    #[allow(dead_code)]
    ip: IpAddr,
    #[allow(dead_code)]
    entity_id: i64,
    position: Mutex<(f64, f64, f64)>,
    movement_log: Mutex<MovementLog>,
    total_distance: Mutex<f64>,
    movements: AtomicU32,
    /// Recorded for humanness signal alongside the five judged criteria
    /// (§4.6); not itself a PASS/FAIL input.
    #[allow(dead_code)]
    jumped: AtomicBool,
    #[allow(dead_code)]
    crouched: AtomicBool,
    #[allow(dead_code)]
    interacted: AtomicBool,
    entered_at: Instant,
    #[allow(dead_code)]
    deadline: Instant,
    resolved: AtomicBool,
    cancel: tokio::sync::Notify,
    /// The destination the front-end already chose before verification
    /// started; requested via [`crate::callbacks::PacketSink`] on PASS.
    destination: String,
}

impl VirtualPlayer {
    fn new(
        uuid: Uuid,
        ip: IpAddr,
        entity_id: i64,
        now: Instant,
        deadline: Instant,
        destination: String,
    ) -> Self {
        Self {
            uuid,
            ip,
            entity_id,
            position: Mutex::new((0.0, 0.0, 0.0)),
            movement_log: Mutex::new(MovementLog {
                deltas: Vec::new(),
                interval_ms: Vec::new(),
                last_timestamp: None,
            }),
            total_distance: Mutex::new(0.0),
            movements: AtomicU32::new(0),
            jumped: AtomicBool::new(false),
            crouched: AtomicBool::new(false),
            interacted: AtomicBool::new(false),
            entered_at: now,
            deadline,
            resolved: AtomicBool::new(false),
            cancel: tokio::sync::Notify::new(),
            destination,
        }
    }

    fn record_movement(&self, x: f64, y: f64, z: f64, now: Instant) {
        let mut pos = self.position.lock().unwrap_or_else(|e| e.into_inner());
        let (px, py, pz) = *pos;
        let (dx, dy, dz) = (x - px, y - py, z - pz);
        *pos = (x, y, z);
        drop(pos);

        let distance = (dx * dx + dy * dy + dz * dz).sqrt();
        *self.total_distance.lock().unwrap_or_else(|e| e.into_inner()) += distance;
        self.movements.fetch_add(1, Ordering::Relaxed);

        let mut log = self
            .movement_log
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(last) = log.last_timestamp {
            log.interval_ms
                .push(elapsed_since(now, last).as_secs_f64() * 1000.0);
        }
        log.last_timestamp = Some(now);
        log.deltas.push(MovementDelta { dx, dz });
    }

    fn evaluate(&self, cfg: &AntiBotConfig, now: Instant) -> Result<(), VerificationError> {
        let log = self
            .movement_log
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let total_distance = *self.total_distance.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = elapsed_since(now, self.entered_at);
        judge::judge(&log.deltas, total_distance, elapsed, &log.interval_ms, cfg)
    }

    /// Attempts to claim resolution for this session. Returns `true` for
    /// the single caller allowed to resolve it (compare-and-set).
    fn try_resolve(&self) -> bool {
        self.resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Synthesizes a minimal, backend-free game world to distinguish humans
/// from bots after login (§4.6).
pub struct VirtualVerificationWorld {
    cfg: Arc<AntiBotConfig>,
    sessions: dashmap::DashMap<Uuid, Arc<VirtualPlayer>>,
    sink: Arc<dyn PacketSink>,
    outcome: Arc<dyn VerificationOutcomeSink>,
    next_entity_id: AtomicI64,
}

impl VirtualVerificationWorld {
    pub fn new(
        cfg: Arc<AntiBotConfig>,
        sink: Arc<dyn PacketSink>,
        outcome: Arc<dyn VerificationOutcomeSink>,
    ) -> Self {
        Self {
            cfg,
            sessions: dashmap::DashMap::new(),
            sink,
            outcome,
            next_entity_id: AtomicI64::new(ENTITY_ID_BASE),
        }
    }

    /// Enters `player` into the verification world: picks the
    /// protocol-appropriate Join encoder, issues the synthesized Join
    /// frame, and schedules the deadline resolution. Returns `true` if
    /// the frame was handed to the sink.
    pub async fn enter(
        &self,
        player: Uuid,
        ip: IpAddr,
        protocol_version: u32,
        destination: impl Into<String>,
        now: Instant,
        self_handle: Arc<Self>,
    ) -> bool {
        let entity_id = self.next_entity_id.fetch_add(1, Ordering::Relaxed);
        let encoder = encoder_for_protocol_version(protocol_version);
        let params = JoinParams {
            entity_id,
            protocol_version,
            gamemode: GameMode::Adventure,
            dimension: "overworld",
            difficulty: Difficulty::Peaceful,
            max_players: 1,
            view_distance: 2,
            hardcore: false,
            position: (8.5, 65.0, 8.5),
        };
        let packet = encoder.encode(&params);

        let deadline = now + self.cfg.mini_world_duration();
        let session = Arc::new(VirtualPlayer::new(
            player,
            ip,
            entity_id,
            now,
            deadline,
            destination.into(),
        ));
        self.sessions.insert(player, session.clone());

        self.sink.write_packet(player, packet).await;
        debug!(%player, entity_id, "entered verification mini-world");

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    self_handle.resolve_at_deadline(player).await;
                }
                _ = session.cancel.notified() => {}
            }
        });

        true
    }

    /// §6 `onPlayerPacket` during verification: updates the tracked
    /// [`VirtualPlayer`] and, on an early pass, resolves and transfers
    /// immediately rather than waiting for the deadline.
    pub async fn on_player_packet(&self, player: Uuid, packet: &PacketKind, now: Instant) {
        let Some(session) = self.sessions.get(&player).map(|e| Arc::clone(&e)) else {
            return;
        };

        match packet {
            PacketKind::PlayPosition { x, y, z } | PacketKind::PlayPositionAndLook { x, y, z } => {
                session.record_movement(*x, *y, *z, now);
            }
            PacketKind::PlayerCommand(action) => {
                use crate::types::PlayerCommandAction::*;
                match action {
                    StartSneaking => session.crouched.store(true, Ordering::Relaxed),
                    StartJumpWithHorse => session.jumped.store(true, Ordering::Relaxed),
                    _ => {}
                }
            }
            PacketKind::InteractEntity => session.interacted.store(true, Ordering::Relaxed),
            _ => return,
        }

        if let Ok(()) = session.evaluate(&self.cfg, now) {
            self.resolve(player, &session, VerificationOutcomeKind::Pass)
                .await;
        }
    }

    /// Called when the owning connection closes before resolution.
    pub fn on_disconnect(&self, player: Uuid) {
        if let Some((_, session)) = self.sessions.remove(&player) {
            session.cancel.notify_waiters();
        }
    }

    async fn resolve_at_deadline(&self, player: Uuid) {
        let Some(session) = self.sessions.get(&player).map(|e| Arc::clone(&e)) else {
            return;
        };
        let now = Instant::now();
        let outcome = match session.evaluate(&self.cfg, now) {
            Ok(()) => VerificationOutcomeKind::Pass,
            Err(reason) => VerificationOutcomeKind::Fail(reason),
        };
        self.resolve(player, &session, outcome).await;
    }

    async fn resolve(&self, player: Uuid, session: &Arc<VirtualPlayer>, outcome: VerificationOutcomeKind) {
        if !session.try_resolve() {
            return;
        }
        self.sessions.remove(&player);
        session.cancel.notify_waiters();

        match outcome {
            VerificationOutcomeKind::Pass => {
                debug!(%player, movements = session.movements.load(Ordering::Relaxed), "verification passed");
                self.sink
                    .transfer_to_destination(player, &session.destination)
                    .await;
                self.outcome.mark_verified(player);
            }
            VerificationOutcomeKind::Fail(reason) => {
                warn!(%player, %reason, "verification failed");
                self.sink
                    .disconnect(player, "Failed automated verification. Please reconnect.")
                    .await;
                self.outcome.kick(player, reason.to_string());
            }
        }
    }

    /// §7's failure taxonomy: any exception inside the virtual world
    /// resolves the session as FAIL with reason "virtual world error"
    /// rather than leaking to the front-end.
    pub async fn fail_with_internal_error(&self, player: Uuid, detail: impl Into<String>) {
        let Some(session) = self.sessions.get(&player).map(|e| Arc::clone(&e)) else {
            return;
        };
        self.resolve(
            player,
            &session,
            VerificationOutcomeKind::Fail(VerificationError::WorldError(detail.into())),
        )
        .await;
    }

    pub fn status(&self) -> VerificationStatus {
        VerificationStatus {
            active_sessions: self.sessions.len(),
        }
    }
}

enum VerificationOutcomeKind {
    Pass,
    Fail(VerificationError),
}

#[derive(Debug, Clone, Copy)]
pub struct VerificationStatus {
    pub active_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PacketInfo;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    struct RecordingSink {
        writes: AtomicUsize,
        disconnects: Mutex<Vec<(Uuid, String)>>,
        transfers: Mutex<Vec<Uuid>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                writes: AtomicUsize::new(0),
                disconnects: Mutex::new(Vec::new()),
                transfers: Mutex::new(Vec::new()),
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
            self.disconnects
                .lock()
                .unwrap()
                .push((player, reason.to_owned()));
        }
    }

    struct RecordingOutcome {
        verified: Mutex<Vec<Uuid>>,
        kicked: Mutex<Vec<(Uuid, String)>>,
    }

    impl RecordingOutcome {
        fn new() -> Self {
            Self {
                verified: Mutex::new(Vec::new()),
                kicked: Mutex::new(Vec::new()),
            }
        }
    }

    impl VerificationOutcomeSink for RecordingOutcome {
        fn mark_verified(&self, player: Uuid) {
            self.verified.lock().unwrap().push(player);
        }
        fn kick(&self, player: Uuid, reason: String) {
            self.kicked.lock().unwrap().push((player, reason));
        }
    }

    fn movement(x: f64, y: f64, z: f64) -> PacketInfo {
        PacketInfo::new(PacketKind::PlayPosition { x, y, z }, 32, bytes::Bytes::new())
    }

    #[tokio::test(start_paused = true)]
    async fn natural_walk_resolves_as_verified_before_deadline() {
        let cfg = Arc::new(AntiBotConfig::default());
        let sink = Arc::new(RecordingSink::new());
        let outcome = Arc::new(RecordingOutcome::new());
        let world = Arc::new(VirtualVerificationWorld::new(
            cfg,
            sink.clone(),
            outcome.clone(),
        ));

        let player = Uuid::new_v4();
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        let t0 = Instant::now();
        assert!(world.enter(player, ip, 763, "lobby", t0, world.clone()).await);
        assert_eq!(sink.writes.load(Ordering::Relaxed), 1);

        // Gaps sum past `judge`'s 3s MIN_ELAPSED by the final step, so the
        // last `on_player_packet` call's own evaluate() resolves this as a
        // PASS well before the 15s deadline fires.
        let steps: [(f64, f64, f64); 5] = [
            (1.0, 0.0, 1.0),
            (2.0, 0.0, 1.2),
            (2.5, 0.0, 0.4),
            (2.6, 0.0, -0.6),
            (2.2, 0.0, -1.2),
        ];
        for (x, y, z) in steps {
            tokio::time::advance(StdDuration::from_millis(700)).await;
            let now = Instant::now();
            world
                .on_player_packet(player, &movement(x, y, z).kind, now)
                .await;
        }

        // let the spawned timeout/cancel task settle after the notify.
        tokio::task::yield_now().await;

        assert_eq!(outcome.verified.lock().unwrap().len(), 1);
        assert!(outcome.kicked.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn bot_like_straight_line_fails_at_deadline() {
        let cfg = Arc::new(AntiBotConfig::default());
        let sink = Arc::new(RecordingSink::new());
        let outcome = Arc::new(RecordingOutcome::new());
        let world = Arc::new(VirtualVerificationWorld::new(
            cfg,
            sink.clone(),
            outcome.clone(),
        ));

        let player = Uuid::new_v4();
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        let t0 = Instant::now();
        world.enter(player, ip, 763, "lobby", t0, world.clone()).await;

        for i in 0..4 {
            tokio::time::advance(StdDuration::from_millis(500)).await;
            let now = Instant::now();
            world
                .on_player_packet(player, &movement(i as f64, 0.0, 0.0).kind, now)
                .await;
        }

        tokio::time::advance(StdDuration::from_secs(20)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(outcome.verified.lock().unwrap().is_empty());
        assert_eq!(outcome.kicked.lock().unwrap().len(), 1);
        assert_eq!(sink.disconnects.lock().unwrap().len(), 1);
    }
}
