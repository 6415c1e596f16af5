//! Membership layer of the Nebula overlay.
//!
//! Tracks which peers exist (routing table, peer store), which links are
//! open (connection registry), which gossip payloads were already relayed
//! (relay dedup cache), and introduces a fresh node to the network through
//! a trusted bootstrap peer.

pub mod address;
pub mod connection_registry;
pub mod distance;
pub mod error;
pub mod handshake;
pub mod peer_store;
pub mod relay_cache;
pub mod routing_table;
pub mod tcp;
pub mod transport;
pub mod wire;

pub use address::{AddressCodec, MultiaddrCodec};
pub use connection_registry::ConnectionRegistry;
pub use distance::{bucket_index, xor_distance, Distance, BUCKET_COUNT};
pub use error::NetworkError;
pub use handshake::{
    AttemptError, BootstrapHandshake, HandshakeConfig, HandshakeError, HandshakeState,
};
pub use peer_store::{AddressRecord, PeerStore};
pub use relay_cache::{RelayDedupCache, DEFAULT_RELAY_CACHE_SIZE};
pub use routing_table::{Liveness, PeerRecord, RoutingTable, UpdateOutcome};
pub use tcp::{TcpStreamHandle, TcpTransport};
pub use transport::{ConnectionEvent, Transport, TransportError};
pub use wire::{Hello, HelloAck, WireMessage, MAX_FRAME_SIZE};
