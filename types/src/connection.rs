//! Connection keys and address validity classes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{NodeId, RoutableAddress};

/// Lifetime of an ephemeral address record, in seconds.
pub const TEMP_ADDR_TTL_SECS: u64 = 10;

/// Validity class of a peer's address record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddressTtl {
    /// Short-lived; may be dropped under pressure or once it expires.
    Ephemeral,
    /// Persists until explicitly replaced.
    Permanent,
}

impl AddressTtl {
    /// Lifetime in seconds, or `None` for records that never expire.
    pub fn duration_secs(&self) -> Option<u64> {
        match self {
            Self::Ephemeral => Some(TEMP_ADDR_TTL_SECS),
            Self::Permanent => None,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent)
    }
}

/// Uniquely identifies one logical link to a peer: the remote address text
/// followed by the remote identifier text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionKey(String);

impl ConnectionKey {
    pub fn new(address: &RoutableAddress, node_id: &NodeId) -> Self {
        Self(format!("{address}{node_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_concatenates_address_and_id() {
        let addr: RoutableAddress = "/ip4/1.2.3.4/tcp/8680".parse().unwrap();
        let id = NodeId::new([3u8; 32]);
        let key = ConnectionKey::new(&addr, &id);
        assert_eq!(key.as_str(), format!("/ip4/1.2.3.4/tcp/8680{id}"));
    }

    #[test]
    fn same_id_different_address_is_a_different_link() {
        let id = NodeId::new([3u8; 32]);
        let a: RoutableAddress = "/ip4/1.2.3.4/tcp/1".parse().unwrap();
        let b: RoutableAddress = "/ip4/1.2.3.4/tcp/2".parse().unwrap();
        assert_ne!(ConnectionKey::new(&a, &id), ConnectionKey::new(&b, &id));
    }

    #[test]
    fn ttl_durations() {
        assert_eq!(AddressTtl::Ephemeral.duration_secs(), Some(TEMP_ADDR_TTL_SECS));
        assert_eq!(AddressTtl::Permanent.duration_secs(), None);
        assert!(AddressTtl::Permanent.is_permanent());
    }
}
