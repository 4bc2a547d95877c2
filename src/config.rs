//! Node configuration.
//!
//! Every field has a default, so a config file only needs the values it changes. The
//! binary loads an optional JSON file first and applies command-line overrides on top.

use crate::ring::{MAX_BITS, NodeId};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration of one ring member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Address of the command listener. Port 0 picks a free port.
    pub bind: SocketAddr,

    /// Address announced to peers when `bind` is a wildcard.
    pub advertise: Option<IpAddr>,

    /// Ring size exponent `m`. Must match across the ring.
    pub bits: u32,

    /// Pins the ring id instead of hashing the advertised address.
    pub node_id: Option<NodeId>,

    /// Existing member to join through at startup.
    pub seed: Option<SocketAddr>,

    /// Directory for the shard snapshot. No persistence when unset.
    pub data_dir: Option<PathBuf>,

    pub discovery: DiscoveryConfig,

    pub summary: SummaryConfig,

    pub intervals: ProtocolIntervals,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8001),
            advertise: None,
            bits: 16,
            node_id: None,
            seed: None,
            data_dir: None,
            discovery: DiscoveryConfig::default(),
            summary: SummaryConfig::default(),
            intervals: ProtocolIntervals::default(),
        }
    }
}

/// UDP broadcast used to announce new members.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub port: u16,
    pub broadcast_addr: IpAddr,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9001,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
        }
    }
}

/// UDP broadcast of aggregated record summaries for the application layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub enabled: bool,
    pub port: u16,
    pub broadcast_addr: IpAddr,
    pub interval_ms: u64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9002,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            interval_ms: 15_000,
        }
    }
}

impl SummaryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Tick period of each background protocol, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolIntervals {
    pub stabilize_ms: u64,
    pub fix_fingers_ms: u64,
    pub check_predecessor_ms: u64,
    pub replicate_ms: u64,
    pub rebalance_ms: u64,
}

impl Default for ProtocolIntervals {
    fn default() -> Self {
        Self {
            stabilize_ms: 10_000,
            fix_fingers_ms: 5_000,
            check_predecessor_ms: 5_000,
            replicate_ms: 8_000,
            rebalance_ms: 10_000,
        }
    }
}

impl ProtocolIntervals {
    pub fn stabilize(&self) -> Duration {
        Duration::from_millis(self.stabilize_ms)
    }

    pub fn fix_fingers(&self) -> Duration {
        Duration::from_millis(self.fix_fingers_ms)
    }

    pub fn check_predecessor(&self) -> Duration {
        Duration::from_millis(self.check_predecessor_ms)
    }

    pub fn replicate(&self) -> Duration {
        Duration::from_millis(self.replicate_ms)
    }

    pub fn rebalance(&self) -> Duration {
        Duration::from_millis(self.rebalance_ms)
    }
}

impl RingConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: RingConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bits == 0 || self.bits > MAX_BITS {
            bail!("bits must be between 1 and {}, got {}", MAX_BITS, self.bits);
        }
        if let Some(id) = self.node_id
            && id >= 1u64 << self.bits
        {
            bail!("node id {} does not fit a {}-bit ring", id, self.bits);
        }

        let intervals = [
            self.intervals.stabilize_ms,
            self.intervals.fix_fingers_ms,
            self.intervals.check_predecessor_ms,
            self.intervals.replicate_ms,
            self.intervals.rebalance_ms,
        ];
        if intervals.contains(&0) || (self.summary.enabled && self.summary.interval_ms == 0) {
            bail!("protocol intervals must be non-zero");
        }

        Ok(())
    }

    /// Address peers use to reach this node once the listener is bound.
    pub fn advertised_addr(&self, bound: SocketAddr) -> Result<SocketAddr> {
        let ip = self.advertise.unwrap_or(bound.ip());
        if ip.is_unspecified() {
            bail!(
                "listener bound to {} but no advertise address is configured",
                bound
            );
        }
        Ok(SocketAddr::new(ip, bound.port()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RingConfig::default();
        assert_eq!(config.bits, 16);
        assert_eq!(config.discovery.port, 9001);
        assert_eq!(config.summary.port, 9002);
        assert_eq!(config.intervals.stabilize(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RingConfig =
            serde_json::from_str(r#"{"bits": 8, "intervals": {"stabilize_ms": 250}}"#).unwrap();

        assert_eq!(config.bits, 8);
        assert_eq!(config.intervals.stabilize_ms, 250);
        assert_eq!(config.intervals.fix_fingers_ms, 5_000);
        assert!(config.discovery.enabled);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RingConfig::default();
        config.bits = 64;
        assert!(config.validate().is_err());

        let mut config = RingConfig::default();
        config.bits = 8;
        config.node_id = Some(256);
        assert!(config.validate().is_err());

        let mut config = RingConfig::default();
        config.intervals.rebalance_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_advertised_addr_requires_concrete_ip() {
        let config = RingConfig::default();
        let wildcard: SocketAddr = "0.0.0.0:8001".parse().unwrap();
        assert!(config.advertised_addr(wildcard).is_err());

        let config = RingConfig {
            advertise: Some("10.0.0.7".parse().unwrap()),
            ..RingConfig::default()
        };
        assert_eq!(
            config.advertised_addr(wildcard).unwrap(),
            "10.0.0.7:8001".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(&path, r#"{"bind": "127.0.0.1:7000", "seed": "127.0.0.1:7001"}"#).unwrap();

        let config = RingConfig::from_file(&path).unwrap();
        assert_eq!(config.bind.port(), 7000);
        assert_eq!(config.seed.unwrap().port(), 7001);
    }
}
