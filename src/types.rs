//! Shared vocabulary types that flow through every stage of the pipeline.
//!
//! The core does not own the Minecraft wire codec (see the external
//! interfaces section of the design): the front-end decodes a frame and
//! hands us a [`PacketInfo`] describing its identity, size, and raw bytes.
//! We never re-serialize a packet to measure it — `frame_len` is the
//! authoritative size the codec already computed.

use bytes::Bytes;

/// The pipeline's decision about a connection or packet event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the event proceed to the next stage / the backend.
    Allow,
    /// Drop the packet, keep the connection open, say nothing.
    DropSilent,
    /// Drop the packet or connection and add the source IP to the blocklist.
    DropAndBlock,
    /// Close the connection outright (no blocklist entry).
    DropAndDisconnect,
}

impl Verdict {
    pub fn is_allow(self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// The pipeline's decision about a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginVerdict {
    Allow,
    EnterVerification,
    Kick(String),
}

/// Per-connection protocol state, per §4.4's state machine:
/// `Handshake -> {Status | Login} -> Play -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Handshake = 0,
    Status = 1,
    Login = 2,
    Play = 3,
    Closed = 4,
}

impl ConnectionState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Handshake,
            1 => ConnectionState::Status,
            2 => ConnectionState::Login,
            3 => ConnectionState::Play,
            _ => ConnectionState::Closed,
        }
    }

    /// Whether `next` is a legal transition from `self`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Handshake, Handshake)
                | (Handshake, Status)
                | (Handshake, Login)
                | (Status, Status)
                | (Login, Login)
                | (Login, Play)
                | (Play, Play)
                | (_, Closed)
        )
    }
}

/// A player-command style flag packet (Minecraft's "Entity Action" packet),
/// used to detect crouch/sprint/jump-with-mount style intent during
/// verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommandAction {
    StartSneaking,
    StopSneaking,
    StartSprinting,
    StopSprinting,
    StartJumpWithHorse,
    StopJumpWithHorse,
}

/// The semantically-typed identity of a decoded packet. This is this crate's
/// stand-in for "the packet" since it does not own the wire codec (see the
/// external-interfaces section of the design).
#[derive(Debug, Clone, PartialEq)]
pub enum PacketKind {
    Handshake,
    StatusRequest,
    StatusPing,
    LoginStart,
    LoginEncryptionResponse,
    LoginPluginResponse,
    LoginAcknowledged,
    /// A movement packet carrying an absolute position (x, y, z).
    PlayPosition { x: f64, y: f64, z: f64 },
    /// A movement packet carrying position and look.
    PlayPositionAndLook { x: f64, y: f64, z: f64 },
    /// A look-only packet; no positional delta.
    PlayRotation,
    /// An on-ground-only movement heartbeat; no positional delta.
    PlayOnGround,
    PlayerCommand(PlayerCommandAction),
    InteractEntity,
    PlayKeepAlive,
    /// Anything else, identified by its protocol name for substring checks
    /// (e.g. "Login", "ServerPing") per §4.4's rate rules.
    Other(&'static str),
}

impl PacketKind {
    /// The protocol-level type name, used for whitelist matching and the
    /// substring-based login/ping counters in §4.4.
    pub fn type_name(&self) -> &str {
        match self {
            PacketKind::Handshake => "Handshake",
            PacketKind::StatusRequest => "StatusRequest",
            PacketKind::StatusPing => "StatusPing",
            PacketKind::LoginStart => "LoginStart",
            PacketKind::LoginEncryptionResponse => "LoginEncryptionResponse",
            PacketKind::LoginPluginResponse => "LoginPluginResponse",
            PacketKind::LoginAcknowledged => "LoginAcknowledged",
            PacketKind::PlayPosition { .. } => "PlayPosition",
            PacketKind::PlayPositionAndLook { .. } => "PlayPositionAndLook",
            PacketKind::PlayRotation => "PlayRotation",
            PacketKind::PlayOnGround => "PlayOnGround",
            PacketKind::PlayerCommand(_) => "PlayerCommand",
            PacketKind::InteractEntity => "InteractEntity",
            PacketKind::PlayKeepAlive => "PlayKeepAlive",
            PacketKind::Other(name) => name,
        }
    }

    /// Position carried by this packet, if any movement occurred.
    pub fn position(&self) -> Option<(f64, f64, f64)> {
        match *self {
            PacketKind::PlayPosition { x, y, z } => Some((x, y, z)),
            PacketKind::PlayPositionAndLook { x, y, z } => Some((x, y, z)),
            _ => None,
        }
    }

    /// The connection state this packet belongs to, for the L7 protocol
    /// violation check.
    pub fn expected_state(&self) -> ConnectionState {
        match self {
            PacketKind::Handshake => ConnectionState::Handshake,
            PacketKind::StatusRequest | PacketKind::StatusPing => ConnectionState::Status,
            PacketKind::LoginStart
            | PacketKind::LoginEncryptionResponse
            | PacketKind::LoginPluginResponse
            | PacketKind::LoginAcknowledged => ConnectionState::Login,
            PacketKind::Other(name) if name.contains("Login") || name.contains("Encryption") => {
                ConnectionState::Login
            }
            _ => ConnectionState::Play,
        }
    }
}

/// A decoded packet handed to the pipeline by the front-end.
#[derive(Debug, Clone)]
pub struct PacketInfo {
    pub kind: PacketKind,
    /// The authoritative, already-decoded frame length (§9.1 (a)): never
    /// re-derived by re-encoding the packet.
    pub frame_len: usize,
    /// Raw payload bytes, used by the harmful-pattern filter.
    pub payload: Bytes,
}

impl PacketInfo {
    pub fn new(kind: PacketKind, frame_len: usize, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            frame_len,
            payload: payload.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }
}
