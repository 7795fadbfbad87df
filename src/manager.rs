//! SecurityManager: pipeline assembly, config binding, and the periodic
//! maintenance/status schedulers (§4.1).
//!
//! Mirrors `valence_network::NetworkSettings`'s relationship to its
//! runtime: the manager never creates its own `tokio::runtime`, it is
//! handed a `Handle` by the embedding proxy and spawns its background
//! tasks on that handle.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::antibot::{AntiBotCoordinator, LoginContext};
use crate::callbacks::{PacketSink, PipelineEvents};
use crate::clock::Instant;
use crate::config::{default_harmful_patterns, CompiledAntiBot, Config};
use crate::l4::L4Guard;
use crate::l7::L7Guard;
use crate::packet_filter::PacketFilter;
use crate::stats::PipelineStats;
use crate::types::{LoginVerdict, PacketInfo, Verdict};
use crate::verify::VirtualVerificationWorld;

const MAINTENANCE_PERIOD: Duration = Duration::from_secs(60);
const STATUS_PERIOD: Duration = Duration::from_secs(15 * 60);

/// The stages currently wired into the pipeline. A `None` stage is simply
/// skipped by the dispatch methods below; its peers still hold whatever
/// shared handles (e.g. the blocklist) they were built with (§4.1.1).
struct Pipeline {
    l4: Option<Arc<L4Guard>>,
    packet_filter: Option<Arc<PacketFilter>>,
    l7: Option<Arc<L7Guard>>,
    antibot: Option<Arc<AntiBotCoordinator>>,
    verify_world: Option<Arc<VirtualVerificationWorld>>,
}

pub struct SecurityManager {
    cfg: ArcSwap<Config>,
    pipeline: ArcSwap<Pipeline>,
    sink: Arc<dyn PacketSink>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SecurityManager {
    pub fn new(cfg: Config, sink: Arc<dyn PacketSink>) -> Arc<Self> {
        let pipeline = build_pipeline(&cfg, sink.clone());
        Arc::new(Self {
            cfg: ArcSwap::from_pointee(cfg),
            pipeline: ArcSwap::from_pointee(pipeline),
            sink,
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Atomic config-reload (§9's design note): rebuilds the pipeline from
    /// the new config and swaps both pointers. In-flight calls that already
    /// loaded the previous `Arc<Pipeline>` finish against it; nothing reads
    /// a torn mix of old and new stage state.
    pub fn reload(&self, cfg: Config) {
        let pipeline = build_pipeline(&cfg, self.sink.clone());
        self.pipeline.store(Arc::new(pipeline));
        self.cfg.store(Arc::new(cfg));
        info!("security pipeline configuration reloaded");
    }

    pub fn config(&self) -> Arc<Config> {
        self.cfg.load_full()
    }

    /// A consistent-enough (not transactionally atomic across stages)
    /// snapshot for the outer proxy's own metrics exporter (§1.1).
    pub fn stats(&self) -> PipelineStats {
        let pipeline = self.pipeline.load();
        PipelineStats {
            l4: pipeline.l4.as_ref().map(|s| s.status()),
            packet_filter: pipeline.packet_filter.as_ref().map(|s| s.status()),
            l7: pipeline.l7.as_ref().map(|s| s.status()),
            antibot: pipeline.antibot.as_ref().map(|s| s.status()),
            verification: pipeline.verify_world.as_ref().map(|s| s.status()),
        }
    }

    /// Registers the maintenance (1 min) and status (15 min) periodic
    /// tasks on the given runtime handle. Each tick's failure is isolated
    /// per stage so one failing sweep never stops the others (§4.1).
    pub fn start(self: &Arc<Self>, handle: &tokio::runtime::Handle) {
        let maintenance = {
            let manager = self.clone();
            handle.spawn(async move {
                let mut ticker = tokio::time::interval(MAINTENANCE_PERIOD);
                loop {
                    ticker.tick().await;
                    manager.run_maintenance();
                }
            })
        };

        let status = {
            let manager = self.clone();
            handle.spawn(async move {
                let mut ticker = tokio::time::interval(STATUS_PERIOD);
                loop {
                    ticker.tick().await;
                    manager.report_status();
                }
            })
        };

        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([maintenance, status]);
    }

    /// Cancels the periodic tasks. Stage state (blocklist, sessions, etc.)
    /// is left intact for post-mortem inspection; new traffic is simply no
    /// longer dispatched once the embedding proxy stops calling in.
    pub fn stop(&self) {
        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
    }

    fn run_maintenance(&self) {
        let pipeline = self.pipeline.load();
        let now = Instant::now();
        if let Some(l4) = &pipeline.l4 {
            l4.sweep(now);
        }
        if let Some(pf) = &pipeline.packet_filter {
            pf.sweep(now);
        }
        if let Some(l7) = &pipeline.l7 {
            l7.sweep(now);
        }
    }

    fn report_status(&self) {
        info!(stats = ?self.stats(), "periodic pipeline status report");
    }
}

fn build_pipeline(cfg: &Config, sink: Arc<dyn PacketSink>) -> Pipeline {
    let l4 = Arc::new(L4Guard::new(cfg.l4.clone()));
    let blocklist = l4.blocklist_handle();
    let block_duration = cfg.block_duration();

    let harmful_patterns = default_harmful_patterns();
    let packet_filter = Arc::new(PacketFilter::new(
        cfg.packet_filter.clone(),
        harmful_patterns
            .into_iter()
            .filter_map(|re| regex::bytes::Regex::new(re.as_str()).ok())
            .collect(),
    ));

    let l7 = Arc::new(L7Guard::new(cfg.l7.clone(), blocklist, block_duration));

    let (antibot, verify_world) = if cfg.anti_bot.enabled {
        let compiled = CompiledAntiBot::compile(&cfg.anti_bot);
        let antibot = Arc::new(AntiBotCoordinator::new(cfg.anti_bot.clone(), &compiled));
        let world = Arc::new(VirtualVerificationWorld::new(
            Arc::new(cfg.anti_bot.clone()),
            sink,
            antibot.clone(),
        ));
        (Some(antibot), Some(world))
    } else {
        (None, None)
    };

    Pipeline {
        l4: Some(l4),
        packet_filter: Some(packet_filter),
        l7: Some(l7),
        antibot,
        verify_world,
    }
}

#[async_trait]
impl PipelineEvents for SecurityManager {
    async fn on_accept(&self, ip: IpAddr) -> Verdict {
        let pipeline = self.pipeline.load();
        let now = Instant::now();
        if let Some(l4) = &pipeline.l4 {
            let v = l4.on_connect(ip, now);
            if !v.is_allow() {
                return v;
            }
        }
        Verdict::Allow
    }

    async fn on_packet(&self, ip: IpAddr, packet: &PacketInfo) -> Verdict {
        let pipeline = self.pipeline.load();
        let now = Instant::now();

        if let Some(l4) = &pipeline.l4 {
            let v = l4.on_packet(ip, packet, now);
            if !v.is_allow() {
                return v;
            }
        }
        if let Some(pf) = &pipeline.packet_filter {
            let v = pf.check(ip, packet, now);
            if !v.is_allow() {
                return v;
            }
        }
        if let Some(l7) = &pipeline.l7 {
            let v = l7.on_packet(ip, packet, now);
            if !v.is_allow() {
                return v;
            }
        }
        Verdict::Allow
    }

    async fn on_exception(&self, ip: IpAddr, error: &(dyn std::error::Error + Send + Sync)) {
        let pipeline = self.pipeline.load();
        let now = Instant::now();
        warn!(%ip, error = %error, "pipeline exception reported");
        if let Some(l4) = &pipeline.l4 {
            l4.on_exception(ip, now);
        }
        if let Some(l7) = &pipeline.l7 {
            l7.on_exception(ip, now);
        }
    }

    async fn on_disconnect(&self, ip: IpAddr) {
        let pipeline = self.pipeline.load();
        if let Some(l4) = &pipeline.l4 {
            l4.on_disconnect(ip);
        }
        if let Some(pf) = &pipeline.packet_filter {
            pf.on_disconnect(ip);
        }
        if let Some(l7) = &pipeline.l7 {
            l7.on_disconnect(ip);
        }
    }

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
    ) -> LoginVerdict {
        let pipeline = self.pipeline.load();
        let Some(antibot) = pipeline.antibot.clone() else {
            return LoginVerdict::Allow;
        };

        if let Some(ms) = ping_ms {
            antibot.report_latency(player, ms);
        }

        let ctx = LoginContext {
            ip,
            username,
            client_brand: brand,
            virtual_host,
            ping_ms,
        };
        let verdict = antibot.on_login(player, &ctx, Instant::now()).await;

        if verdict == LoginVerdict::EnterVerification {
            if let Some(world) = pipeline.verify_world.clone() {
                // The virtual host is the server name the client asked to
                // connect to; proxies of this shape (BungeeCord/Velocity
                // style) already use it to select the backend, so it
                // doubles as the destination handed to `transferToDestination`
                // on a verification PASS. Backend selection itself remains
                // the front-end's job (§1's Non-goals).
                let destination = virtual_host.unwrap_or("default").to_owned();
                world
                    .enter(player, ip, protocol_version, destination, Instant::now(), world.clone())
                    .await;
            }
        }

        verdict
    }

    async fn on_player_packet(&self, player: Uuid, packet: &PacketInfo) {
        let pipeline = self.pipeline.load();
        if let Some(world) = &pipeline.verify_world {
            world.on_player_packet(player, &packet.kind, Instant::now()).await;
        }
    }
}
