//! Identity primitives for the Nebula overlay.
//!
//! - **Ed25519** key pairs for node identity
//! - **Blake2b-256** for deriving node identifiers and relay checksums
//! - Seeded or OS-backed randomness for key generation

pub mod error;
pub mod hash;
pub mod identity;
pub mod keys;

pub use error::CryptoError;
pub use hash::{blake2b_256, checksum};
pub use identity::{generate_identity, NodeIdentity};
pub use keys::{
    generate_keypair, generate_keypair_with, keypair_from_private, keypair_from_seed,
    node_id_from_public_key, public_from_private,
};
