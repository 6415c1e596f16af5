//! Blake2b-256 digests: node ids are derived from it and relay dedup keys on it.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use nebula_types::Checksum;

type Blake2b256 = Blake2b<U32>;

pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Blake2b256::digest(data));
    out
}

/// Dedup key for a relayed payload.
pub fn checksum(payload: &[u8]) -> Checksum {
    Checksum::new(blake2b_256(payload))
}
