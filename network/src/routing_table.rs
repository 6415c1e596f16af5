//! XOR-bucketed table of known peers.
//!
//! 256 buckets indexed by the common-prefix length with the local id. Each
//! bucket holds at most `bucket_size` records ordered least-recently-seen
//! first. A full bucket only admits an ephemeral newcomer by evicting a
//! record already marked `Failed`; otherwise the newcomer is rejected and
//! the caller is told which unverified record to check. A permanent
//! newcomer (a greeted trusted node) displaces the stalest non-permanent
//! record instead.

use std::time::Duration;

use nebula_types::{AddressTtl, NodeId};

use crate::distance::{bucket_index, xor_distance, BUCKET_COUNT};

/// Result of the most recent liveness check on a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    Unknown,
    Live,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: NodeId,
    pub ttl: AddressTtl,
    /// Recency tick; larger means seen more recently.
    pub last_seen: u64,
    pub liveness: Liveness,
}

/// What [`RoutingTable::update`] did with an id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Inserted,
    Refreshed,
    /// The bucket was full; `evicted` had failed its liveness check, or was
    /// displaced by a permanent newcomer.
    Evicted { evicted: NodeId },
    /// The bucket was full of peers not known to be dead. `stale` is the
    /// least-recently-seen peer whose liveness is still unknown, if any.
    Rejected { stale: Option<NodeId> },
    SelfIgnored,
}

pub struct RoutingTable {
    local_id: NodeId,
    bucket_size: usize,
    bucket_latency: Duration,
    buckets: Vec<Vec<PeerRecord>>,
    tick: u64,
}

impl RoutingTable {
    pub fn new(local_id: NodeId, bucket_size: usize, bucket_latency: Duration) -> Self {
        Self {
            local_id,
            bucket_size,
            bucket_latency,
            buckets: vec![Vec::new(); BUCKET_COUNT],
            tick: 0,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Insert or refresh `id` with an ephemeral ttl.
    pub fn update(&mut self, id: NodeId) -> UpdateOutcome {
        self.update_with_ttl(id, AddressTtl::Ephemeral)
    }

    /// Insert or refresh `id`. A refresh marks the record live and never
    /// downgrades a permanent one.
    pub fn update_with_ttl(&mut self, id: NodeId, ttl: AddressTtl) -> UpdateOutcome {
        let Some(index) = bucket_index(&self.local_id, &id) else {
            return UpdateOutcome::SelfIgnored;
        };
        self.tick += 1;
        let tick = self.tick;
        let bucket_size = self.bucket_size;
        let bucket = &mut self.buckets[index];

        if let Some(pos) = bucket.iter().position(|r| r.id == id) {
            let mut record = bucket.remove(pos);
            record.last_seen = tick;
            record.ttl = record.ttl.max(ttl);
            record.liveness = Liveness::Live;
            bucket.push(record);
            return UpdateOutcome::Refreshed;
        }

        let record = PeerRecord {
            id,
            ttl,
            last_seen: tick,
            liveness: Liveness::Unknown,
        };

        if bucket.len() < bucket_size {
            bucket.push(record);
            return UpdateOutcome::Inserted;
        }

        let dead = bucket
            .iter()
            .position(|r| r.liveness == Liveness::Failed && !r.ttl.is_permanent())
            .or_else(|| {
                if ttl.is_permanent() {
                    bucket.iter().position(|r| !r.ttl.is_permanent())
                } else {
                    None
                }
            });
        if let Some(pos) = dead {
            let evicted = bucket.remove(pos).id;
            bucket.push(record);
            tracing::debug!(peer = %id, evicted = %evicted, bucket = index, "replaced failed peer");
            return UpdateOutcome::Evicted { evicted };
        }

        let stale = bucket
            .iter()
            .find(|r| r.liveness == Liveness::Unknown && !r.ttl.is_permanent())
            .map(|r| r.id);
        tracing::trace!(peer = %id, bucket = index, "bucket full, rejecting peer");
        UpdateOutcome::Rejected { stale }
    }

    /// Classify a peer by measured round-trip time. Returns `false` for an
    /// unknown id.
    pub fn record_latency(&mut self, id: &NodeId, rtt: Duration) -> bool {
        let liveness = if rtt > self.bucket_latency {
            Liveness::Failed
        } else {
            Liveness::Live
        };
        self.set_liveness(id, liveness)
    }

    pub fn mark_failed(&mut self, id: &NodeId) -> bool {
        self.set_liveness(id, Liveness::Failed)
    }

    pub fn mark_live(&mut self, id: &NodeId) -> bool {
        self.set_liveness(id, Liveness::Live)
    }

    fn set_liveness(&mut self, id: &NodeId, liveness: Liveness) -> bool {
        match self.record_mut(id) {
            Some(record) => {
                record.liveness = liveness;
                true
            }
            None => false,
        }
    }

    /// Up to `count` known peers nearest to `target`, nearest first. Equal
    /// distances go to the most recently seen record.
    pub fn closest_peers(&self, target: &NodeId, count: usize) -> Vec<NodeId> {
        let mut all: Vec<&PeerRecord> = self.buckets.iter().flatten().collect();
        all.sort_by(|a, b| {
            xor_distance(&a.id, target)
                .cmp(&xor_distance(&b.id, target))
                .then(b.last_seen.cmp(&a.last_seen))
        });
        all.into_iter().take(count).map(|r| r.id).collect()
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<PeerRecord> {
        let index = bucket_index(&self.local_id, id)?;
        let bucket = &mut self.buckets[index];
        let pos = bucket.iter().position(|r| r.id == *id)?;
        Some(bucket.remove(pos))
    }

    pub fn get(&self, id: &NodeId) -> Option<&PeerRecord> {
        let index = bucket_index(&self.local_id, id)?;
        self.buckets[index].iter().find(|r| r.id == *id)
    }

    fn record_mut(&mut self, id: &NodeId) -> Option<&mut PeerRecord> {
        let index = bucket_index(&self.local_id, id)?;
        self.buckets[index].iter_mut().find(|r| r.id == *id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_len(&self, index: usize) -> usize {
        self.buckets.get(index).map_or(0, Vec::len)
    }

    /// Every known peer id, bucket by bucket.
    pub fn peers(&self) -> Vec<NodeId> {
        self.buckets.iter().flatten().map(|r| r.id).collect()
    }
}
