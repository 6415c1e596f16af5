//! Ed25519 key generation and node id derivation.

use ed25519_dalek::SigningKey;
use nebula_types::{KeyPair, NodeId, PrivateKey, PublicKey};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::{blake2b_256, CryptoError};

/// Generate a new Ed25519 key pair from the given random source.
///
/// Fails with [`CryptoError::KeyGeneration`] when the source cannot supply
/// 32 bytes of secret material.
pub fn generate_keypair_with<R: RngCore + CryptoRng>(rng: &mut R) -> Result<KeyPair, CryptoError> {
    let mut secret = [0u8; 32];
    rng.try_fill_bytes(&mut secret)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let kp = keypair_from_seed(&secret);
    secret.zeroize();
    Ok(kp)
}

/// Generate a new Ed25519 key pair from the OS random source.
pub fn generate_keypair() -> Result<KeyPair, CryptoError> {
    generate_keypair_with(&mut OsRng)
}

/// Derive the public key from a private key.
pub fn public_from_private(private: &PrivateKey) -> PublicKey {
    let signing_key = SigningKey::from_bytes(&private.0);
    let verifying_key = signing_key.verifying_key();
    PublicKey(verifying_key.to_bytes())
}

/// Reconstruct a full key pair from a private key.
pub fn keypair_from_private(private: PrivateKey) -> KeyPair {
    let public = public_from_private(&private);
    KeyPair { public, private }
}

/// Derive a key pair from a 32-byte seed (deterministic).
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    let signing_key = SigningKey::from_bytes(seed);
    let verifying_key = signing_key.verifying_key();
    KeyPair {
        public: PublicKey(verifying_key.to_bytes()),
        private: PrivateKey(signing_key.to_bytes()),
    }
}

/// Node identifier for a public key: Blake2b-256 of the key bytes.
pub fn node_id_from_public_key(public: &PublicKey) -> NodeId {
    NodeId::new(blake2b_256(public.as_bytes()))
}
