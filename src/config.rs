//! Declarative configuration surface (§6 of the design) plus TOML loading.
//!
//! `Config` is the unit of hot-reload: [`crate::manager::SecurityManager`]
//! holds it behind an [`arc_swap::ArcSwap`] so a reload is a single atomic
//! pointer swap and in-flight pipeline calls keep using the snapshot they
//! captured at the start of the call (§9's design note).

use std::collections::HashSet;
use std::time::Duration;

use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct L4Config {
    pub max_connections_per_ip: u32,
    pub max_packets_per_second: u32,
    pub rate_limit_window_ms: u64,
    pub block_duration_ms: u64,
    pub max_exceptions_per_window: u32,
}

impl Default for L4Config {
    fn default() -> Self {
        Self {
            max_connections_per_ip: 5,
            max_packets_per_second: 100,
            rate_limit_window_ms: 1000,
            block_duration_ms: 300_000,
            max_exceptions_per_window: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketFilterConfig {
    pub max_packet_size: usize,
    pub block_harmful_patterns: bool,
    pub block_repeated_packets: bool,
    pub whitelist: Vec<String>,
    pub repeated_packet_ring_capacity: usize,
}

impl Default for PacketFilterConfig {
    fn default() -> Self {
        Self {
            max_packet_size: 32_768,
            block_harmful_patterns: true,
            block_repeated_packets: true,
            whitelist: vec![
                "Handshake".to_owned(),
                "StatusRequest".to_owned(),
                "StatusPing".to_owned(),
                "LoginStart".to_owned(),
            ],
            repeated_packet_ring_capacity: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct L7Config {
    pub max_login_attempts_per_ip: u32,
    pub max_packet_type_per_second: u32,
    pub max_server_list_pings_per_ip: u32,
    pub detect_protocol_violations: bool,
    pub max_exceptions_per_window: u32,
}

impl Default for L7Config {
    fn default() -> Self {
        Self {
            max_login_attempts_per_ip: 20,
            max_packet_type_per_second: 100,
            max_server_list_pings_per_ip: 3,
            detect_protocol_violations: true,
            max_exceptions_per_window: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiBotConfig {
    pub enabled: bool,
    pub check_only_first_join: bool,
    pub kick_threshold: u32,
    pub kick_message: String,
    pub allowed_brands: Vec<String>,
    pub username_patterns: Vec<String>,
    pub sequential_char_threshold: u32,
    pub allow_direct_ip_connections: bool,
    pub allowed_domains: Vec<String>,
    pub excluded_ips: Vec<String>,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub rate_limit_threshold: u32,
    pub rate_limit_window_ms: u64,
    pub mini_world_duration_ms: u64,
    pub mini_world_min_movements: u32,
    pub mini_world_min_distance: f64,
}

impl Default for AntiBotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_only_first_join: true,
            kick_threshold: 5,
            kick_message: "Failed automated verification. Please reconnect.".to_owned(),
            allowed_brands: Vec::new(),
            username_patterns: Vec::new(),
            sequential_char_threshold: 4,
            allow_direct_ip_connections: false,
            allowed_domains: Vec::new(),
            excluded_ips: Vec::new(),
            min_latency_ms: 10,
            max_latency_ms: 1000,
            rate_limit_threshold: 5,
            rate_limit_window_ms: 10_000,
            mini_world_duration_ms: 15_000,
            mini_world_min_movements: 3,
            mini_world_min_distance: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub l4: L4Config,
    pub packet_filter: PacketFilterConfig,
    pub l7: L7Config,
    pub anti_bot: AntiBotConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(s)?;
        Ok(cfg)
    }

    pub fn mini_world_duration(&self) -> Duration {
        Duration::from_millis(self.anti_bot.mini_world_duration_ms)
    }

    pub fn l4_window(&self) -> Duration {
        Duration::from_millis(self.l4.rate_limit_window_ms)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(self.l4.block_duration_ms)
    }
}

/// A validated, derived view of [`AntiBotConfig`]'s string-based fields
/// (compiled regexes, parsed CIDRs). Built once at config load / reload,
/// never per-check, matching the harmful-pattern filter's "compile once"
/// rule in §4.3.1.
///
/// Fields that failed to parse are simply omitted and a `warn!` is logged
/// for each (taxonomy tier (3): fail open on the single offending rule,
/// not the whole component).
pub struct CompiledAntiBot {
    pub username_patterns: Vec<Regex>,
    pub excluded_ips: Vec<IpNet>,
    pub allowed_brands: HashSet<String>,
    pub allowed_domains: Vec<String>,
}

impl CompiledAntiBot {
    pub fn compile(cfg: &AntiBotConfig) -> Self {
        let username_patterns = cfg
            .username_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "skipping invalid username pattern");
                    None
                }
            })
            .collect();

        let excluded_ips = cfg
            .excluded_ips
            .iter()
            .filter_map(|c| match c.parse::<IpNet>() {
                Ok(net) => Some(net),
                Err(_) => {
                    warn!(cidr = %c, "skipping invalid excluded-ip CIDR");
                    None
                }
            })
            .collect();

        Self {
            username_patterns,
            excluded_ips,
            allowed_brands: cfg.allowed_brands.iter().cloned().collect(),
            allowed_domains: cfg.allowed_domains.clone(),
        }
    }
}

/// Compiled harmful-content patterns for [`crate::packet_filter::PacketFilter`].
/// Default set per §4.3.1; never exhaustive, operators extend via config.
pub fn default_harmful_patterns() -> Vec<Regex> {
    let sources = [
        r"(?i)(union\s+select|\bor\s+1=1\b|--\s|;\s*drop\s+table)",
        r"\.\./",
        r"\.\.\\",
        r"(?i)<script[\s>]",
    ];

    sources
        .iter()
        .filter_map(|s| Regex::new(s).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_surface() {
        let cfg = Config::default();
        assert_eq!(cfg.l4.max_connections_per_ip, 5);
        assert_eq!(cfg.l4.max_packets_per_second, 100);
        assert_eq!(cfg.packet_filter.max_packet_size, 32_768);
        assert_eq!(cfg.l7.max_server_list_pings_per_ip, 3);
        assert_eq!(cfg.anti_bot.kick_threshold, 5);
        assert_eq!(cfg.anti_bot.mini_world_min_movements, 3);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = Config::default();
        let s = toml::to_string(&cfg).expect("serialize");
        let back = Config::from_toml_str(&s).expect("parse");
        assert_eq!(cfg.l4.max_connections_per_ip, back.l4.max_connections_per_ip);
        assert_eq!(cfg.anti_bot.kick_message, back.anti_bot.kick_message);
    }

    #[test]
    fn invalid_regex_is_skipped_not_fatal() {
        let mut cfg = AntiBotConfig::default();
        cfg.username_patterns = vec!["bot[0-9]+".to_owned(), "(unclosed".to_owned()];
        let compiled = CompiledAntiBot::compile(&cfg);
        assert_eq!(compiled.username_patterns.len(), 1);
    }
}
