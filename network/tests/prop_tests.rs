//! Property tests for distance, routing table bounds, address codec and
//! relay cache eviction.

use std::time::Duration;

use nebula_network::{
    xor_distance, AddressCodec, Distance, MultiaddrCodec, RelayDedupCache, RoutingTable,
    UpdateOutcome, BUCKET_COUNT,
};
use nebula_types::{ConnectionKey, NodeId, RoutableAddress};
use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

fn any_node_id() -> impl Strategy<Value = NodeId> {
    prop::array::uniform32(0u8..).prop_map(NodeId::new)
}

fn any_address() -> impl Strategy<Value = RoutableAddress> {
    prop_oneof![
        (any::<[u8; 4]>(), any::<u16>())
            .prop_map(|(ip, port)| RoutableAddress::new(IpAddr::V4(Ipv4Addr::from(ip)), port)),
        (any::<[u8; 16]>(), any::<u16>())
            .prop_map(|(ip, port)| RoutableAddress::new(IpAddr::V6(Ipv6Addr::from(ip)), port)),
    ]
}

proptest! {
    #[test]
    fn distance_is_symmetric(a in any_node_id(), b in any_node_id()) {
        prop_assert_eq!(xor_distance(&a, &b), xor_distance(&b, &a));
    }

    #[test]
    fn distance_to_self_is_zero(a in any_node_id()) {
        prop_assert_eq!(xor_distance(&a, &a), Distance::ZERO);
    }

    #[test]
    fn distance_zero_only_for_equal_ids(a in any_node_id(), b in any_node_id()) {
        prop_assert_eq!(xor_distance(&a, &b).is_zero(), a == b);
    }

    #[test]
    fn codec_roundtrip(addr in any_address(), id in any_node_id()) {
        let text = MultiaddrCodec.encode(&addr, &id);
        prop_assert_eq!(MultiaddrCodec.decode(&text).unwrap(), (addr, id));
    }

    #[test]
    fn buckets_never_exceed_capacity(
        local in any_node_id(),
        ids in prop::collection::vec(any_node_id(), 0..200),
        bucket_size in 1usize..8,
    ) {
        let mut table = RoutingTable::new(local, bucket_size, Duration::from_millis(100));
        for (i, id) in ids.iter().enumerate() {
            table.update(*id);
            if i % 3 == 0 {
                table.mark_failed(id);
            }
        }
        for index in 0..BUCKET_COUNT {
            prop_assert!(table.bucket_len(index) <= bucket_size);
        }
        prop_assert!(!table.contains(&local));
    }

    #[test]
    fn eviction_is_deterministic(
        local in any_node_id(),
        ids in prop::collection::vec(any_node_id(), 0..100),
        failed in prop::collection::vec(any::<bool>(), 100),
    ) {
        let run = || {
            let mut table = RoutingTable::new(local, 2, Duration::from_millis(100));
            let mut outcomes: Vec<UpdateOutcome> = Vec::new();
            for (i, id) in ids.iter().enumerate() {
                outcomes.push(table.update(*id));
                if failed[i] {
                    table.mark_failed(id);
                }
            }
            (outcomes, table.closest_peers(&local, usize::MAX))
        };
        prop_assert_eq!(run(), run());
    }

    #[test]
    fn only_lru_checksum_is_dropped(capacity in 1usize..32) {
        let cache = RelayDedupCache::new(capacity);
        let addr: RoutableAddress = "/ip4/10.0.0.1/tcp/1".parse().unwrap();
        let source = ConnectionKey::new(&addr, &NodeId::new([1u8; 32]));
        let sums: Vec<_> = (0..=capacity)
            .map(|i| RelayDedupCache::checksum(&i.to_be_bytes()))
            .collect();
        for sum in &sums {
            cache.mark_seen(*sum, source.clone());
        }
        prop_assert!(!cache.has_seen(&sums[0]));
        for sum in &sums[1..] {
            prop_assert!(cache.has_seen(sum));
        }
    }
}
