//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use nebula_network::{AddressCodec, MultiaddrCodec, DEFAULT_RELAY_CACHE_SIZE};
use nebula_types::RoutableAddress;

use crate::logging::LogFormat;
use crate::NodeError;

/// Configuration for a Nebula node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Read-only once the node is
/// constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Chain this node belongs to. Peers on other chains are refused.
    #[serde(default = "default_chain_id")]
    pub chain_id: u32,

    /// Protocol version announced in hellos.
    #[serde(default = "default_version")]
    pub version: u8,

    /// IP to listen on for P2P connections.
    #[serde(default = "default_ip")]
    pub ip: IpAddr,

    /// Port to listen on for P2P connections.
    #[serde(default = "default_p2p_port")]
    pub port: u16,

    /// Identity seed. 0 draws keys from the OS random source; anything else
    /// produces the same identity on every run (test networks only).
    #[serde(default)]
    pub random_seed: u64,

    /// Maximum peers per routing-table bucket.
    #[serde(default = "default_bucket_size")]
    pub bucket_size: usize,

    /// Round-trip time above which a peer is considered failed.
    #[serde(default = "default_bucket_latency_ms")]
    pub bucket_latency_ms: u64,

    /// Number of gossip checksums remembered for relay dedup.
    #[serde(default = "default_relay_cache_size")]
    pub relay_cache_size: usize,

    /// Bootstrap peers, `/ip4/<ip>/tcp/<port>/ipfs/<id>`.
    #[serde(default)]
    pub trusted_nodes: Vec<String>,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to collect Prometheus metrics.
    #[serde(default)]
    pub enable_metrics: bool,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_chain_id() -> u32 {
    100
}

fn default_version() -> u8 {
    1
}

fn default_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_p2p_port() -> u16 {
    8680
}

fn default_bucket_size() -> usize {
    16
}

fn default_bucket_latency_ms() -> u64 {
    10_000
}

fn default_relay_cache_size() -> usize {
    DEFAULT_RELAY_CACHE_SIZE
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.bucket_size == 0 {
            return Err(NodeError::Config("bucket_size must be at least 1".into()));
        }
        if self.relay_cache_size == 0 {
            return Err(NodeError::Config(
                "relay_cache_size must be at least 1".into(),
            ));
        }
        self.log_format()?;
        for trusted in &self.trusted_nodes {
            MultiaddrCodec
                .decode(trusted)
                .map_err(|e| NodeError::Config(format!("trusted_nodes: {e}")))?;
        }
        Ok(())
    }

    pub fn listen_address(&self) -> RoutableAddress {
        RoutableAddress::new(self.ip, self.port)
    }

    pub fn bucket_latency(&self) -> Duration {
        Duration::from_millis(self.bucket_latency_ms)
    }

    pub fn log_format(&self) -> Result<LogFormat, NodeError> {
        self.log_format.parse()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            version: default_version(),
            ip: default_ip(),
            port: default_p2p_port(),
            random_seed: 0,
            bucket_size: default_bucket_size(),
            bucket_latency_ms: default_bucket_latency_ms(),
            relay_cache_size: default_relay_cache_size(),
            trusted_nodes: Vec::new(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            enable_metrics: false,
        }
    }
}
