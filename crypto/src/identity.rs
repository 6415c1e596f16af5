//! Long-term node identity.
//!
//! A node generates its key pair once at startup and derives its
//! [`NodeId`] from the public key. A zero seed draws from the OS CSPRNG; any
//! other seed drives a deterministic generator so test networks come up
//! with the same ids on every run. Seeded identities are not secret.

use std::fmt;

use nebula_types::{KeyPair, NodeId, PrivateKey, PublicKey};
use rand::rngs::{OsRng, StdRng};
use rand::SeedableRng;

use crate::keys::{generate_keypair_with, node_id_from_public_key};
use crate::CryptoError;

/// Key pair plus the identifier derived from it.
///
/// `Debug` prints only the public half.
pub struct NodeIdentity {
    public_key: PublicKey,
    private_key: PrivateKey,
    id: NodeId,
}

impl NodeIdentity {
    /// Wrap an existing key pair, deriving its id.
    pub fn from_keypair(kp: KeyPair) -> Self {
        let id = node_id_from_public_key(&kp.public);
        Self {
            public_key: kp.public,
            private_key: kp.private,
            id,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("id", &self.id)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Generate a node identity. `seed == 0` uses the OS random source; any
/// other value seeds a deterministic generator.
pub fn generate_identity(seed: u64) -> Result<NodeIdentity, CryptoError> {
    let kp = if seed == 0 {
        generate_keypair_with(&mut OsRng)?
    } else {
        generate_keypair_with(&mut StdRng::seed_from_u64(seed))?
    };
    Ok(NodeIdentity::from_keypair(kp))
}
