//! Fundamental types for the Nebula overlay network.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! node identifiers, key material, routable addresses, connection keys, relay
//! checksums and timestamps.

pub mod address;
pub mod base58;
pub mod connection;
pub mod error;
pub mod hash;
pub mod keys;
pub mod node_id;
pub mod time;

pub use address::RoutableAddress;
pub use connection::{AddressTtl, ConnectionKey, TEMP_ADDR_TTL_SECS};
pub use error::TypesError;
pub use hash::Checksum;
pub use keys::{KeyPair, PrivateKey, PublicKey};
pub use node_id::{NodeId, NODE_ID_LEN};
pub use time::Timestamp;
