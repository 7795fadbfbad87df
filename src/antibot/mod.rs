//! AntiBot coordinator (§4.5): composes independent heuristic checks
//! behind one ordered `Vec<Box<dyn BotCheck>>`, the same "small named
//! checks behind one trait-object list" shape `valence_network`'s
//! `NetworkCallbacks` uses for pluggable per-event behavior — except
//! here the list is data-driven from config rather than one user impl.

mod checks;

use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

pub use checks::{
    BotCheck, CheckOutcome, ClientBrandCheck, ConnectionRateCheck, DnsHostCheck,
    LatencyCheck, LatencySamples, LoginContext, UsernamePatternCheck,
};

use crate::clock::Instant;
use crate::config::{AntiBotConfig, CompiledAntiBot};
use crate::types::LoginVerdict;
use crate::verify::VerificationOutcomeSink;

/// `NEW -> CHECKING -> {VERIFIED | SUSPICIOUS | BOT}` per §4.5. VERIFIED
/// and BOT are terminal; SUSPICIOUS may still transition to BOT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Checking,
    Verified,
    Suspicious,
    Bot,
}

pub struct AntiBotSession {
    pub ip: IpAddr,
    pub verified: bool,
    pub failed_checks: u32,
    pub first_seen: Instant,
    pub state: SessionState,
}

impl AntiBotSession {
    fn new(ip: IpAddr, now: Instant) -> Self {
        Self {
            ip,
            verified: false,
            failed_checks: 0,
            first_seen: now,
            state: SessionState::New,
        }
    }
}

/// Composes the synchronous heuristic checks and the per-player scoring
/// state machine. The mini-world check (§4.6) is asynchronous and lives
/// in [`crate::verify::VirtualVerificationWorld`]; this coordinator is
/// handed to that world as a [`VerificationOutcomeSink`] to close the
/// loop without a back-pointer to the whole coordinator (§9).
pub struct AntiBotCoordinator {
    cfg: AntiBotConfig,
    checks: Vec<Box<dyn BotCheck>>,
    sessions: DashMap<Uuid, AntiBotSession>,
    latency: LatencySamples,
    disconnect_log: Mutex<Vec<(Uuid, String)>>,
}

impl AntiBotCoordinator {
    pub fn new(cfg: AntiBotConfig, compiled: &CompiledAntiBot) -> Self {
        let mut checks: Vec<Box<dyn BotCheck>> = Vec::new();
        checks.push(Box::new(ConnectionRateCheck::new(
            cfg.rate_limit_threshold,
            cfg.rate_limit_window_ms,
        )));
        checks.push(Box::new(UsernamePatternCheck::new(
            compiled,
            cfg.sequential_char_threshold,
        )));
        if !cfg.allowed_brands.is_empty() {
            checks.push(Box::new(ClientBrandCheck::new(compiled)));
        }
        checks.push(Box::new(DnsHostCheck::new(
            cfg.allow_direct_ip_connections,
            compiled,
        )));
        checks.push(Box::new(LatencyCheck::new(cfg.min_latency_ms, cfg.max_latency_ms)));

        Self {
            cfg,
            checks,
            sessions: DashMap::new(),
            latency: LatencySamples::new(),
            disconnect_log: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AntiBotConfig {
        &self.cfg
    }

    /// Refreshes a player's sampled latency from the front-end's existing
    /// keep-alive round trip (§9.1 (b) — the core issues no keep-alives
    /// of its own).
    pub fn report_latency(&self, player: Uuid, ms: u32) {
        self.latency.report(player, ms);
    }

    /// §6 `onLogin`: runs the synchronous checks and decides ALLOW,
    /// ENTER_VERIFICATION, or KICK. A session is only created for a
    /// login that isn't immediately kicked (§8 scenario 3: a kicked
    /// login's session is never created).
    pub async fn on_login(&self, player: Uuid, ctx: &LoginContext<'_>, now: Instant) -> LoginVerdict {
        if !self.cfg.enabled {
            return LoginVerdict::Allow;
        }

        if self.cfg.check_only_first_join {
            if let Some(session) = self.sessions.get(&player) {
                if session.state == SessionState::Verified {
                    return LoginVerdict::Allow;
                }
            }
        }

        let mut failed = 0u32;
        for check in &self.checks {
            if let CheckOutcome::Fail(reason) = check.evaluate(ctx, now) {
                debug!(%player, reason, "anti-bot check failed");
                failed += 1;
            }
        }

        if let CheckOutcome::Fail(reason) = self.verify_virtual_host_dns(ctx).await {
            debug!(%player, reason, "anti-bot check failed");
            failed += 1;
        }

        if failed >= self.cfg.kick_threshold {
            warn!(%player, failed, "anti-bot kick threshold reached at login");
            return LoginVerdict::Kick(self.cfg.kick_message.clone());
        }

        let mut session = AntiBotSession::new(ctx.ip, now);
        session.failed_checks = failed;
        session.state = if failed > 0 {
            SessionState::Suspicious
        } else {
            SessionState::Checking
        };
        self.sessions.insert(player, session);

        LoginVerdict::EnterVerification
    }

    /// Reverse-checks a non-IP-literal virtual host against the connecting
    /// IP. This is §5's suspension point (b): a real resolver round trip,
    /// so it is wrapped in a deadline and run off whatever task called
    /// `on_login`, matching `valence_network`'s pattern of doing the
    /// session-server HTTP round trip inside the async login path rather
    /// than blocking the accept loop. A timed-out or failed lookup is
    /// fail-open (`Pass`) — DNS flakiness is not itself bot evidence.
    async fn verify_virtual_host_dns(&self, ctx: &LoginContext<'_>) -> CheckOutcome {
        let Some(host) = ctx.virtual_host else {
            return CheckOutcome::Pass;
        };
        if host.parse::<IpAddr>().is_ok() {
            return CheckOutcome::Pass;
        }

        let lookup = tokio::time::timeout(
            Duration::from_millis(500),
            tokio::net::lookup_host((host, 25565)),
        )
        .await;

        match lookup {
            Ok(Ok(addrs)) => {
                let resolved: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
                if resolved.is_empty() || resolved.contains(&ctx.ip) {
                    CheckOutcome::Pass
                } else {
                    CheckOutcome::Fail("virtual host does not resolve to the connecting IP")
                }
            }
            Ok(Err(e)) => {
                debug!(host, error = %e, "virtual host DNS lookup failed, failing open");
                CheckOutcome::Pass
            }
            Err(_) => {
                debug!(host, "virtual host DNS lookup timed out, failing open");
                CheckOutcome::Pass
            }
        }
    }

    pub fn on_disconnect(&self, player: Uuid) {
        self.sessions.remove(&player);
        self.latency.remove(player);
    }

    pub fn session_state(&self, player: Uuid) -> Option<SessionState> {
        self.sessions.get(&player).map(|s| s.state)
    }

    pub fn status(&self) -> AntiBotStatus {
        AntiBotStatus {
            active_sessions: self.sessions.len(),
        }
    }
}

impl VerificationOutcomeSink for AntiBotCoordinator {
    fn mark_verified(&self, player: Uuid) {
        if let Some(mut session) = self.sessions.get_mut(&player) {
            session.verified = true;
            session.state = SessionState::Verified;
        }
    }

    /// The mini-world check is the terminal verification step; failing
    /// it kicks directly rather than adding to the failed-check counter
    /// (the `{markVerified, kick}` interface given in §9 exposes no
    /// generic "record a failure" hook for this check).
    fn kick(&self, player: Uuid, reason: String) {
        if let Some((_, mut session)) = self.sessions.remove(&player) {
            session.state = SessionState::Bot;
        }
        self.disconnect_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((player, reason));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AntiBotStatus {
    pub active_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AntiBotConfig;

    fn compiled(cfg: &AntiBotConfig) -> CompiledAntiBot {
        CompiledAntiBot::compile(cfg)
    }

    fn ctx(username: &'static str) -> LoginContext<'static> {
        LoginContext {
            ip: "203.0.113.7".parse().unwrap(),
            username,
            client_brand: None,
            virtual_host: None,
            ping_ms: None,
        }
    }

    #[tokio::test]
    async fn username_pattern_kick_never_creates_a_session() {
        let mut cfg = AntiBotConfig::default();
        cfg.username_patterns = vec!["bot[0-9]+".to_owned()];
        cfg.kick_threshold = 1;
        let compiled = compiled(&cfg);
        let coordinator = AntiBotCoordinator::new(cfg, &compiled);
        let player = Uuid::new_v4();

        let verdict = coordinator.on_login(player, &ctx("bot12345"), Instant::now()).await;
        assert!(matches!(verdict, LoginVerdict::Kick(_)));
        assert!(coordinator.session_state(player).is_none());
    }

    #[tokio::test]
    async fn clean_login_enters_verification() {
        let cfg = AntiBotConfig::default();
        let compiled = compiled(&cfg);
        let coordinator = AntiBotCoordinator::new(cfg, &compiled);
        let player = Uuid::new_v4();

        let verdict = coordinator.on_login(player, &ctx("RealPlayer"), Instant::now()).await;
        assert_eq!(verdict, LoginVerdict::EnterVerification);
        assert_eq!(coordinator.session_state(player), Some(SessionState::Checking));
    }

    #[tokio::test]
    async fn mark_verified_short_circuits_future_logins_when_check_only_first_join() {
        let mut cfg = AntiBotConfig::default();
        cfg.check_only_first_join = true;
        let compiled = compiled(&cfg);
        let coordinator = AntiBotCoordinator::new(cfg, &compiled);
        let player = Uuid::new_v4();

        coordinator.on_login(player, &ctx("RealPlayer"), Instant::now()).await;
        coordinator.mark_verified(player);

        let verdict = coordinator.on_login(player, &ctx("RealPlayer"), Instant::now()).await;
        assert_eq!(verdict, LoginVerdict::Allow);
    }

    #[tokio::test]
    async fn dns_check_fails_open_when_host_has_no_dns_to_resolve() {
        let cfg = AntiBotConfig::default();
        let compiled = compiled(&cfg);
        let coordinator = AntiBotCoordinator::new(cfg, &compiled);
        let mut c = ctx("RealPlayer");
        c.virtual_host = Some("play.unresolvable-test-domain.invalid");

        let verdict = coordinator.on_login(Uuid::new_v4(), &c, Instant::now()).await;
        assert_eq!(verdict, LoginVerdict::EnterVerification);
    }
}
