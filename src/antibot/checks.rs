//! The individual heuristic checks composed by [`super::AntiBotCoordinator`]
//! (§4.5, §4.5.1). Each is a small, independently testable `BotCheck`.

use std::net::IpAddr;
use std::sync::Mutex;

use dashmap::DashMap;

use crate::clock::Instant;
use crate::config::CompiledAntiBot;
use crate::state::rate::RateTracker;

/// Everything a check needs to evaluate one login attempt. Built by the
/// coordinator from the front-end's `onLogin` arguments.
pub struct LoginContext<'a> {
    pub ip: IpAddr,
    pub username: &'a str,
    pub client_brand: Option<&'a str>,
    pub virtual_host: Option<&'a str>,
    pub ping_ms: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    Fail(&'static str),
}

pub trait BotCheck: Send + Sync {
    fn evaluate(&self, ctx: &LoginContext, now: Instant) -> CheckOutcome;
}

/// Rejects an IP that opened more than `threshold` connections within
/// `window`. Tracks its own rate state rather than reusing L4's, since
/// this check is about login-attempt velocity, not raw packet/connection
/// counts (§4.5's connection-rate check is a distinct signal from L4's).
pub struct ConnectionRateCheck {
    threshold: u32,
    window_ms: u64,
    rates: DashMap<IpAddr, RateTracker>,
}

impl ConnectionRateCheck {
    pub fn new(threshold: u32, window_ms: u64) -> Self {
        Self {
            threshold,
            window_ms,
            rates: DashMap::new(),
        }
    }
}

impl BotCheck for ConnectionRateCheck {
    fn evaluate(&self, ctx: &LoginContext, now: Instant) -> CheckOutcome {
        let tracker = self
            .rates
            .entry(ctx.ip)
            .or_insert_with(|| RateTracker::new(now, self.window_ms));
        let obs = tracker.record(now);
        if obs.count > self.threshold {
            CheckOutcome::Fail("connection rate exceeded")
        } else {
            CheckOutcome::Pass
        }
    }
}

/// Counts the longest run of identical-or-sequential characters in a
/// username (e.g. "aaaa" or "abcd"), a cheap tell for generated names.
pub fn longest_sequential_run(username: &str) -> u32 {
    let chars: Vec<char> = username.chars().collect();
    if chars.is_empty() {
        return 0;
    }
    let mut longest = 1u32;
    let mut current = 1u32;
    for pair in chars.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let identical = a == b;
        let sequential = (b as i32 - a as i32) == 1;
        if identical || sequential {
            current += 1;
        } else {
            current = 1;
        }
        longest = longest.max(current);
    }
    longest
}

/// Ratio-based character-class imbalance: true if the username is
/// overwhelmingly one class (all-digit, or digits dominating letters in
/// a way no normal player name is), a loose signature of bulk-generated
/// accounts like "Player8823919".
pub fn has_extreme_character_class_imbalance(username: &str) -> bool {
    let total = username.chars().count();
    if total < 4 {
        return false;
    }
    let digits = username.chars().filter(|c| c.is_ascii_digit()).count();
    let letters = username.chars().filter(|c| c.is_ascii_alphabetic()).count();
    if letters == 0 {
        return true;
    }
    digits * 4 >= total * 3 // digits make up at least 3/4 of the name
}

pub struct UsernamePatternCheck {
    patterns: Vec<regex::Regex>,
    sequential_char_threshold: u32,
}

impl UsernamePatternCheck {
    pub fn new(compiled: &CompiledAntiBot, sequential_char_threshold: u32) -> Self {
        Self {
            patterns: compiled.username_patterns.clone(),
            sequential_char_threshold,
        }
    }
}

impl BotCheck for UsernamePatternCheck {
    fn evaluate(&self, ctx: &LoginContext, _now: Instant) -> CheckOutcome {
        if self.patterns.iter().any(|re| re.is_match(ctx.username)) {
            return CheckOutcome::Fail("username matches a configured bot pattern");
        }
        if self.sequential_char_threshold > 0
            && longest_sequential_run(ctx.username) >= self.sequential_char_threshold
        {
            return CheckOutcome::Fail("username has a long sequential/repeated character run");
        }
        if has_extreme_character_class_imbalance(ctx.username) {
            return CheckOutcome::Fail("username has an extreme character-class imbalance");
        }
        CheckOutcome::Pass
    }
}

pub struct ClientBrandCheck {
    allowed_brands: std::collections::HashSet<String>,
}

impl ClientBrandCheck {
    pub fn new(compiled: &CompiledAntiBot) -> Self {
        Self {
            allowed_brands: compiled.allowed_brands.clone(),
        }
    }
}

impl BotCheck for ClientBrandCheck {
    fn evaluate(&self, ctx: &LoginContext, _now: Instant) -> CheckOutcome {
        if self.allowed_brands.is_empty() {
            return CheckOutcome::Pass;
        }
        match ctx.client_brand {
            Some(brand) if self.allowed_brands.contains(brand) => CheckOutcome::Pass,
            _ => CheckOutcome::Fail("client brand not in the allowed list"),
        }
    }
}

/// Rejects direct-IP virtual hosts unless the connecting IP is excluded
/// (CIDR-aware), and optionally requires the virtual host to match an
/// allow-listed domain.
pub struct DnsHostCheck {
    allow_direct_ip: bool,
    excluded_ips: Vec<ipnet::IpNet>,
    allowed_domains: Vec<String>,
}

impl DnsHostCheck {
    pub fn new(allow_direct_ip: bool, compiled: &CompiledAntiBot) -> Self {
        Self {
            allow_direct_ip,
            excluded_ips: compiled.excluded_ips.clone(),
            allowed_domains: compiled.allowed_domains.clone(),
        }
    }

    fn ip_excluded(&self, ip: IpAddr) -> bool {
        self.excluded_ips.iter().any(|net| net.contains(&ip))
    }
}

impl BotCheck for DnsHostCheck {
    fn evaluate(&self, ctx: &LoginContext, _now: Instant) -> CheckOutcome {
        let Some(host) = ctx.virtual_host else {
            return CheckOutcome::Pass;
        };

        let is_direct_ip = host.parse::<IpAddr>().is_ok();
        if is_direct_ip && !self.allow_direct_ip && !self.ip_excluded(ctx.ip) {
            return CheckOutcome::Fail("direct-IP virtual host connections are disallowed");
        }

        if !self.allowed_domains.is_empty()
            && !is_direct_ip
            && !self.allowed_domains.iter().any(|d| d == host)
        {
            return CheckOutcome::Fail("virtual host not in the allowed domain list");
        }

        CheckOutcome::Pass
    }
}

pub struct LatencyCheck {
    min_ms: u32,
    max_ms: u32,
}

impl LatencyCheck {
    pub fn new(min_ms: u32, max_ms: u32) -> Self {
        Self { min_ms, max_ms }
    }
}

impl BotCheck for LatencyCheck {
    fn evaluate(&self, ctx: &LoginContext, _now: Instant) -> CheckOutcome {
        match ctx.ping_ms {
            Some(ping) if ping < self.min_ms || ping > self.max_ms => {
                CheckOutcome::Fail("measured latency outside the plausible human range")
            }
            _ => CheckOutcome::Pass,
        }
    }
}

/// Sampled round-trip latency per player, refreshed from the front-end's
/// existing keep-alive traffic (§9.1 (b) — the core never issues its own
/// keep-alives).
pub struct LatencySamples {
    samples: Mutex<std::collections::HashMap<uuid::Uuid, u32>>,
}

impl LatencySamples {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn report(&self, player: uuid::Uuid, ms: u32) {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(player, ms);
    }

    pub fn get(&self, player: uuid::Uuid) -> Option<u32> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&player)
            .copied()
    }

    pub fn remove(&self, player: uuid::Uuid) {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&player);
    }
}

impl Default for LatencySamples {
    fn default() -> Self {
        Self::new()
    }
}
