//! The two small traits the embedding proxy implements and hands to
//! [`crate::manager::SecurityManager`] (§6): `PipelineEvents` is called by
//! the front-end on its own I/O thread for every upstream event;
//! `PacketSink` is called by the core for the handful of operations that
//! need to reach back out to the connection. Both are `async_trait`,
//! matching `valence_network::NetworkCallbacks`'s shape for pluggable
//! per-event behavior.

use std::net::IpAddr;

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{LoginVerdict, PacketInfo, Verdict};

/// Upstream callbacks the front-end invokes into the pipeline.
#[async_trait]
pub trait PipelineEvents: Send + Sync {
    async fn on_accept(&self, ip: IpAddr) -> Verdict;

    async fn on_packet(&self, ip: IpAddr, packet: &PacketInfo) -> Verdict;

    async fn on_exception(&self, ip: IpAddr, error: &(dyn std::error::Error + Send + Sync));

    async fn on_disconnect(&self, ip: IpAddr);

    #[allow(clippy::too_many_arguments)]
    async fn on_login(
        &self,
        player: Uuid,
        ip: IpAddr,
        username: &str,
        brand: Option<&str>,
        virtual_host: Option<&str>,
        protocol_version: u32,
        ping_ms: Option<u32>,
    ) -> LoginVerdict;

    async fn on_player_packet(&self, player: Uuid, packet: &PacketInfo);
}

/// Downstream operations the core invokes back into the front-end, used
/// by [`crate::verify`] to drive the synthetic verification world and by
/// [`crate::antibot`] to act on a kick decided out-of-band (§4.6, §9).
#[async_trait]
pub trait PacketSink: Send + Sync {
    async fn write_packet(&self, player: Uuid, packet: crate::verify::SynthesizedPacket);

    async fn transfer_to_destination(&self, player: Uuid, server_name: &str);

    async fn disconnect(&self, player: Uuid, reason: &str);
}
