//! Address book: which transport addresses each known peer answers on.
//!
//! Ephemeral addresses expire [`nebula_types::TEMP_ADDR_TTL_SECS`] after they were last
//! added; permanent ones stay until replaced. Callers pass `now` in so
//! expiry is testable without a clock.

use std::collections::HashMap;

use nebula_types::{AddressTtl, NodeId, RoutableAddress, Timestamp};
use parking_lot::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressRecord {
    pub address: RoutableAddress,
    pub ttl: AddressTtl,
    /// `None` for permanent records.
    pub expires_at: Option<Timestamp>,
}

impl AddressRecord {
    fn new(address: RoutableAddress, ttl: AddressTtl, now: Timestamp) -> Self {
        Self {
            address,
            ttl,
            expires_at: ttl.duration_secs().map(|secs| now.add_secs(secs)),
        }
    }

    fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Default)]
pub struct PeerStore {
    records: Mutex<HashMap<NodeId, Vec<AddressRecord>>>,
}

impl PeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `address` for `id`. Re-adding an ephemeral address refreshes
    /// its expiry; adding it as permanent upgrades it. An ephemeral add never
    /// downgrades a permanent record.
    pub fn add_addr(&self, id: NodeId, address: RoutableAddress, ttl: AddressTtl, now: Timestamp) {
        let mut records = self.records.lock();
        let addrs = records.entry(id).or_default();
        match addrs.iter_mut().find(|r| r.address == address) {
            Some(existing) if existing.ttl.is_permanent() => {}
            Some(existing) => *existing = AddressRecord::new(address, ttl, now),
            None => addrs.push(AddressRecord::new(address, ttl, now)),
        }
        tracing::trace!(peer = %id, %address, ?ttl, "address recorded");
    }

    /// Unexpired addresses of `id`, in insertion order.
    pub fn addrs(&self, id: &NodeId, now: Timestamp) -> Vec<RoutableAddress> {
        self.records
            .lock()
            .get(id)
            .map(|addrs| {
                addrs
                    .iter()
                    .filter(|r| !r.is_expired(now))
                    .map(|r| r.address)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn ttl_of(&self, id: &NodeId, address: &RoutableAddress) -> Option<AddressTtl> {
        self.records
            .lock()
            .get(id)?
            .iter()
            .find(|r| r.address == *address)
            .map(|r| r.ttl)
    }

    pub fn records_of(&self, id: &NodeId) -> Vec<AddressRecord> {
        self.records.lock().get(id).cloned().unwrap_or_default()
    }

    /// Drop expired addresses and peers left without any. Returns the number
    /// of addresses removed.
    pub fn gc_expired(&self, now: Timestamp) -> usize {
        let mut records = self.records.lock();
        let mut removed = 0;
        records.retain(|_, addrs| {
            let before = addrs.len();
            addrs.retain(|r| !r.is_expired(now));
            removed += before - addrs.len();
            !addrs.is_empty()
        });
        removed
    }

    pub fn peers(&self) -> Vec<NodeId> {
        self.records.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
