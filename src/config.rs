use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::ConfigError;

/// The thirteen root server v4 addresses, the bootstrap set used when no
/// hints are configured.
const ROOT_SERVERS: &[&str] = &[
    "198.41.0.4",     // a.root-servers.net
    "170.247.170.2",  // b.root-servers.net
    "192.33.4.12",    // c.root-servers.net
    "199.7.91.13",    // d.root-servers.net
    "192.203.230.10", // e.root-servers.net
    "192.5.5.241",    // f.root-servers.net
    "192.112.36.4",   // g.root-servers.net
    "198.97.190.53",  // h.root-servers.net
    "192.36.148.17",  // i.root-servers.net
    "192.58.128.30",  // j.root-servers.net
    "193.0.14.129",   // k.root-servers.net
    "199.7.83.42",    // l.root-servers.net
    "202.12.27.33",   // m.root-servers.net
];

/// Resolver tuning. `Default` gives a working validating resolver aimed at
/// the public root.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Addresses queried when no deeper zone cut is cached.
    pub root_hints: Vec<SocketAddr>,

    /// Validate answers against the trust anchors.
    pub validation_enabled: bool,

    /// Randomize query-name casing over UDP and require the echo to match.
    pub case_randomization: bool,

    /// EDNS(0) advertised UDP payload size.
    pub udp_payload_size: u16,

    /// Per-server, per-attempt network timeout.
    pub server_timeout: Duration,

    /// Wall-clock budget for one whole resolution.
    pub query_timeout: Duration,

    /// UDP retransmissions per server beyond the first attempt.
    pub max_retries: u8,

    /// Servers queried concurrently per zone.
    pub query_fanout: usize,

    /// Referral/alias hop budget per resolution.
    pub max_depth: u8,

    /// Cache capacity in rrset entries.
    pub max_cache_entries: usize,

    /// Ceiling applied to every cached TTL.
    pub max_ttl: u32,

    /// Ceiling applied to negative-answer TTLs.
    pub negative_max_ttl: u32,

    /// Lifetime of a cached bogus verdict.
    pub bogus_ttl: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            root_hints: ROOT_SERVERS
                .iter()
                .map(|ip| SocketAddr::new(ip.parse::<IpAddr>().unwrap(), 53))
                .collect(),
            validation_enabled: true,
            case_randomization: true,
            udp_payload_size: 4096,
            server_timeout: Duration::from_secs(2),
            query_timeout: Duration::from_secs(10),
            max_retries: 2,
            query_fanout: 2,
            max_depth: 30,
            max_cache_entries: 65_536,
            max_ttl: 86_400,
            negative_max_ttl: 3_600,
            bogus_ttl: 60,
        }
    }
}

impl ResolverConfig {
    /// Defaults overridden from `RATATOSK_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(hints) = read_env("RATATOSK_ROOT_HINTS") {
            let parsed: Vec<SocketAddr> = hints
                .split(',')
                .filter_map(|s| {
                    let s = s.trim();
                    s.parse::<SocketAddr>()
                        .or_else(|_| s.parse::<IpAddr>().map(|ip| SocketAddr::new(ip, 53)))
                        .map_err(|e| warn!("ignoring root hint {:?}: {}", s, e))
                        .ok()
                })
                .collect();
            if !parsed.is_empty() {
                config.root_hints = parsed;
            }
        }
        if let Some(value) = read_env("RATATOSK_VALIDATION") {
            config.validation_enabled = matches!(value.as_str(), "1" | "true" | "yes");
        }
        if let Some(value) = read_env("RATATOSK_CASE_RANDOMIZATION") {
            config.case_randomization = matches!(value.as_str(), "1" | "true" | "yes");
        }
        if let Some(value) = parse_env("RATATOSK_UDP_PAYLOAD_SIZE") {
            config.udp_payload_size = value;
        }
        if let Some(secs) = parse_env("RATATOSK_SERVER_TIMEOUT_SECS") {
            config.server_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env("RATATOSK_QUERY_TIMEOUT_SECS") {
            config.query_timeout = Duration::from_secs(secs);
        }
        if let Some(value) = parse_env("RATATOSK_MAX_RETRIES") {
            config.max_retries = value;
        }
        if let Some(value) = parse_env("RATATOSK_QUERY_FANOUT") {
            config.query_fanout = value;
        }
        if let Some(value) = parse_env("RATATOSK_MAX_DEPTH") {
            config.max_depth = value;
        }
        if let Some(value) = parse_env("RATATOSK_MAX_CACHE_ENTRIES") {
            config.max_cache_entries = value;
        }
        if let Some(value) = parse_env("RATATOSK_MAX_TTL") {
            config.max_ttl = value;
        }
        if let Some(value) = parse_env("RATATOSK_NEGATIVE_MAX_TTL") {
            config.negative_max_ttl = value;
        }
        if let Some(value) = parse_env("RATATOSK_BOGUS_TTL") {
            config.bogus_ttl = value;
        }

        info!(
            "resolver configured: {} root hints, validation={}, fanout={}, depth={}",
            config.root_hints.len(),
            config.validation_enabled,
            config.query_fanout,
            config.max_depth
        );
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_hints.is_empty() {
            return Err(ConfigError::NoRootHints);
        }
        if self.server_timeout.is_zero() || self.query_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "timeouts must be non-zero".to_string(),
            ));
        }
        if self.server_timeout > self.query_timeout {
            return Err(ConfigError::InvalidTimeout(format!(
                "server timeout {:?} exceeds query timeout {:?}",
                self.server_timeout, self.query_timeout
            )));
        }
        if self.query_fanout == 0 {
            return Err(ConfigError::InvalidFanout("fan-out must be at least 1".to_string()));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::InvalidDepth("depth budget must be at least 1".to_string()));
        }
        if self.max_cache_entries == 0 {
            return Err(ConfigError::InvalidCacheSize(
                "cache must hold at least one entry".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    let raw = read_env(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ResolverConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_fanout() {
        let config = ResolverConfig {
            query_fanout: 0,
            ..ResolverConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFanout(_))));
    }

    #[test]
    fn rejects_inverted_timeouts() {
        let config = ResolverConfig {
            server_timeout: Duration::from_secs(30),
            ..ResolverConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout(_))));
    }
}
