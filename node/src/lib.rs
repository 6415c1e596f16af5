//! Nebula node: composes identity, membership state and transport.
//!
//! The node is the central coordinator that:
//! - Generates the node identity
//! - Owns the routing table, peer store, connection registry and relay cache
//! - Greets trusted bootstrap nodes
//! - Pumps transport connection events into the registry
//! - Relays gossip without reprocessing duplicates

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod shutdown;
pub mod tracing_spans;

pub use config::NodeConfig;
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use node::{Node, NodeState, RelayOutcome};
pub use shutdown::{ShutdownController, StopReason};
