//! Bounded LRU cache of relayed gossip payloads.
//!
//! Maps a payload checksum to the set of links that have already delivered
//! it, so the same payload is neither reprocessed nor flooded back to a
//! peer that sent it. At capacity the least-recently-used checksum is
//! dropped together with its whole source set.

use std::collections::HashSet;
use std::num::NonZeroUsize;

use lru::LruCache;
use nebula_types::{Checksum, ConnectionKey};
use parking_lot::Mutex;

/// Default number of tracked checksums.
pub const DEFAULT_RELAY_CACHE_SIZE: usize = 65_536;

pub struct RelayDedupCache {
    cache: Mutex<LruCache<Checksum, HashSet<ConnectionKey>>>,
}

impl RelayDedupCache {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Dedup key of a payload.
    pub fn checksum(payload: &[u8]) -> Checksum {
        nebula_crypto::checksum(payload)
    }

    /// Whether `checksum` is tracked. Does not touch recency.
    pub fn has_seen(&self, checksum: &Checksum) -> bool {
        self.cache.lock().contains(checksum)
    }

    /// Record that `source` delivered `checksum`, making it most recent.
    pub fn mark_seen(&self, checksum: Checksum, source: ConnectionKey) {
        let mut cache = self.cache.lock();
        Self::insert_locked(&mut cache, checksum, source);
    }

    /// Atomically check and mark. Returns `true` on the first sighting.
    pub fn observe(&self, checksum: Checksum, source: ConnectionKey) -> bool {
        let mut cache = self.cache.lock();
        let first = !cache.contains(&checksum);
        Self::insert_locked(&mut cache, checksum, source);
        first
    }

    fn insert_locked(
        cache: &mut LruCache<Checksum, HashSet<ConnectionKey>>,
        checksum: Checksum,
        source: ConnectionKey,
    ) {
        if let Some(sources) = cache.get_mut(&checksum) {
            sources.insert(source);
        } else {
            let mut sources = HashSet::new();
            sources.insert(source);
            cache.put(checksum, sources);
        }
    }

    /// Links that delivered `checksum`; empty if untracked.
    pub fn sources_of(&self, checksum: &Checksum) -> HashSet<ConnectionKey> {
        self.cache.lock().peek(checksum).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }
}

impl Default for RelayDedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_CACHE_SIZE)
    }
}
