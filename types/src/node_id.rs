//! Node identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::base58;
use crate::TypesError;

/// Length of a node identifier in bytes.
pub const NODE_ID_LEN: usize = 32;

/// A fixed-length identifier naming a node on the overlay.
///
/// Derived once from the node's public key and never recomputed. The text
/// form is base58, which is also how the id appears in trusted-node
/// addresses (`.../ipfs/<base58-id>`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    pub const fn new(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Build an identifier from an arbitrary byte slice, rejecting any
    /// length other than [`NODE_ID_LEN`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypesError> {
        let arr: [u8; NODE_ID_LEN] =
            bytes
                .try_into()
                .map_err(|_| TypesError::InvalidIdentifier {
                    expected: NODE_ID_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Parse the base58 text form.
    pub fn from_base58(s: &str) -> Result<Self, TypesError> {
        let bytes = base58::decode(s).ok_or_else(|| TypesError::InvalidBase58(s.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn to_base58(&self) -> String {
        base58::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }
}

impl FromStr for NodeId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.to_base58();
        let short = text.get(..8).unwrap_or(&text);
        write!(f, "NodeId({short}..)")
    }
}

impl From<[u8; NODE_ID_LEN]> for NodeId {
    fn from(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }
}
