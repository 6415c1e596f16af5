//! XOR distance over node identifiers.
//!
//! Distance between two ids is their bytewise XOR read as a big-endian
//! 256-bit integer. The routing table buckets peers by the length of the
//! common prefix they share with the local id, which is the number of
//! leading zero bits of that distance.

use std::fmt;

use nebula_types::{NodeId, NODE_ID_LEN};

/// One bucket per possible common-prefix length of two distinct ids.
pub const BUCKET_COUNT: usize = NODE_ID_LEN * 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Distance([u8; NODE_ID_LEN]);

impl Distance {
    pub const ZERO: Self = Self([0u8; NODE_ID_LEN]);

    pub fn between(a: &NodeId, b: &NodeId) -> Self {
        let mut out = [0u8; NODE_ID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = a.as_bytes()[i] ^ b.as_bytes()[i];
        }
        Self(out)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Number of leading zero bits, 256 for the zero distance.
    pub fn leading_zeros(&self) -> u32 {
        let mut zeros = 0;
        for byte in self.0 {
            if byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance(lz={})", self.leading_zeros())
    }
}

pub fn xor_distance(a: &NodeId, b: &NodeId) -> Distance {
    Distance::between(a, b)
}

/// Bucket that `other` falls into relative to `local`, or `None` when the
/// two ids are equal.
pub fn bucket_index(local: &NodeId, other: &NodeId) -> Option<usize> {
    let d = Distance::between(local, other);
    if d.is_zero() {
        None
    } else {
        Some(d.leading_zeros() as usize)
    }
}
