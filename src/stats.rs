//! A single aggregated snapshot across every stage, for the 15-minute
//! status reporter (§4.1) and for the embedding proxy's own metrics
//! exporter. This crate never pushes to Prometheus/statsd itself — that
//! wiring is the outer proxy's job, the same boundary `valence_network`
//! draws around its `get_stats()`-shaped accessors (§1.1).

use crate::antibot::AntiBotStatus;
use crate::l4::L4Status;
use crate::l7::L7Status;
use crate::packet_filter::PacketFilterStatus;
use crate::verify::VerificationStatus;

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub l4: Option<L4Status>,
    pub packet_filter: Option<PacketFilterStatus>,
    pub l7: Option<L7Status>,
    pub antibot: Option<AntiBotStatus>,
    pub verification: Option<VerificationStatus>,
}
