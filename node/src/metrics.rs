//! Prometheus metrics for the Nebula node.
//!
//! The [`NodeMetrics`] struct owns a dedicated [`Registry`] which
//! [`NodeMetrics::encode`] renders in the Prometheus text exposition format.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Opts, Registry, TextEncoder,
};

use crate::NodeError;

/// Membership-layer metrics.
pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Connection keys with at least one open connection.
    pub peer_count: IntGauge,
    /// Peers currently held in the routing table.
    pub routing_table_size: IntGauge,

    // ── Counters ────────────────────────────────────────────────────────
    pub handshakes_succeeded: IntCounter,
    pub handshakes_failed: IntCounter,
    /// Gossip payloads seen for the first time and forwarded.
    pub gossip_relayed: IntCounter,
    /// Gossip payloads dropped as already seen.
    pub gossip_duplicates: IntCounter,
}

impl NodeMetrics {
    /// Create a fresh set of metrics registered under a new [`Registry`].
    pub fn new() -> Result<Self, NodeError> {
        let registry = Registry::new();

        let peer_count = register_int_gauge_with_registry!(
            Opts::new("nebula_peer_count", "Open peer connections"),
            registry
        )?;
        let routing_table_size = register_int_gauge_with_registry!(
            Opts::new("nebula_routing_table_size", "Peers in the routing table"),
            registry
        )?;
        let handshakes_succeeded = register_int_counter_with_registry!(
            Opts::new(
                "nebula_handshakes_succeeded_total",
                "Bootstrap hellos that were acknowledged"
            ),
            registry
        )?;
        let handshakes_failed = register_int_counter_with_registry!(
            Opts::new(
                "nebula_handshakes_failed_total",
                "Bootstrap hellos that exhausted their retries"
            ),
            registry
        )?;
        let gossip_relayed = register_int_counter_with_registry!(
            Opts::new(
                "nebula_gossip_relayed_total",
                "Gossip payloads forwarded on first sighting"
            ),
            registry
        )?;
        let gossip_duplicates = register_int_counter_with_registry!(
            Opts::new(
                "nebula_gossip_duplicates_total",
                "Gossip payloads dropped as duplicates"
            ),
            registry
        )?;

        Ok(Self {
            registry,
            peer_count,
            routing_table_size,
            handshakes_succeeded,
            handshakes_failed,
            gossip_relayed,
            gossip_duplicates,
        })
    }

    /// Render every metric in the text exposition format.
    pub fn encode(&self) -> Result<String, NodeError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| NodeError::Config(e.to_string()))
    }
}
