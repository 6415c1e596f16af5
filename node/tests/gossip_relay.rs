//! Gossip relay and dedup through the node's event pump.

use std::time::Duration;

use nebula_network::WireMessage;
use nebula_node::{Node, NodeConfig, RelayOutcome};
use nebula_nullables::{NullStream, NullTransport};
use nebula_types::{NodeId, RoutableAddress};

async fn running_node() -> Node<NullTransport> {
    let config = NodeConfig {
        random_seed: 11,
        relay_cache_size: 8,
        ..NodeConfig::default()
    };
    let mut node = Node::new(config, NullTransport::new()).await.unwrap();
    node.start().await.unwrap();
    node
}

async fn connect(node: &Node<NullTransport>, n: u8) -> NullStream {
    let addr: RoutableAddress = format!("/ip4/10.0.0.{n}/tcp/8680").parse().unwrap();
    let stream = node.transport().open_inbound(NodeId::new([n; 32]), addr);
    wait_until(|| node.registry().connection_count(&stream.key()) == 1).await;
    stream
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn gossip(payload: &[u8]) -> WireMessage {
    WireMessage::Gossip {
        payload: payload.to_vec(),
    }
}

#[tokio::test]
async fn inbound_gossip_is_forwarded_to_other_links_only() {
    let node = running_node().await;
    let a = connect(&node, 1).await;
    let b = connect(&node, 2).await;
    let mut local = node.subscribe_gossip();

    node.transport().deliver(&a, gossip(b"block-1"));
    wait_until(|| node.transport().sent().len() == 1).await;

    let (to, frame) = node.transport().sent().remove(0);
    assert_eq!(to, b);
    assert_eq!(WireMessage::decode(&frame).unwrap(), gossip(b"block-1"));
    assert_eq!(local.recv().await.unwrap(), b"block-1".to_vec());
    assert_eq!(node.metrics().gossip_relayed.get(), 1);
}

#[tokio::test]
async fn duplicate_gossip_is_dropped() {
    let node = running_node().await;
    let a = connect(&node, 1).await;
    let b = connect(&node, 2).await;

    node.transport().deliver(&a, gossip(b"tx"));
    node.transport().deliver(&b, gossip(b"tx"));
    wait_until(|| node.metrics().gossip_duplicates.get() == 1).await;

    assert_eq!(node.transport().sent().len(), 1);
    let checksum = nebula_network::RelayDedupCache::checksum(b"tx");
    let sources = node.relay_cache().sources_of(&checksum);
    assert!(sources.contains(&a.key()));
    assert!(sources.contains(&b.key()));
}

#[tokio::test]
async fn broadcast_reaches_every_link_once() {
    let node = running_node().await;
    connect(&node, 1).await;
    connect(&node, 2).await;
    connect(&node, 3).await;

    assert_eq!(
        node.broadcast(b"local".to_vec()).await.unwrap(),
        RelayOutcome::Forwarded(3)
    );
    assert_eq!(
        node.broadcast(b"local".to_vec()).await.unwrap(),
        RelayOutcome::Duplicate
    );
    assert_eq!(node.transport().sent().len(), 3);
}

#[tokio::test]
async fn relay_skips_the_sender() {
    let node = running_node().await;
    let a = connect(&node, 1).await;
    connect(&node, 2).await;

    assert_eq!(
        node.relay(b"vote".to_vec(), a.key()).await.unwrap(),
        RelayOutcome::Forwarded(1)
    );
    assert!(node.transport().sent().iter().all(|(to, _)| *to != a));
}

#[tokio::test]
async fn gossip_without_local_subscribers_is_still_relayed() {
    let node = running_node().await;
    let a = connect(&node, 1).await;
    let b = connect(&node, 2).await;

    node.transport().deliver(&a, gossip(b"unheard"));
    wait_until(|| node.transport().sent().len() == 1).await;
    assert_eq!(node.transport().sent()[0].0, b);

    let mut local = node.subscribe_gossip();
    node.transport().deliver(&a, gossip(b"heard"));
    assert_eq!(local.recv().await.unwrap(), b"heard".to_vec());
    assert!(matches!(
        local.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
    assert_eq!(node.metrics().gossip_relayed.get(), 2);
}
