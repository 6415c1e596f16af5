//! Routing-table upkeep driven by the event pump: liveness checks on full
//! buckets, departed peers and stream bookkeeping.

use std::time::Duration;

use nebula_network::{AddressCodec, HelloAck, Liveness, MultiaddrCodec};
use nebula_node::{Node, NodeConfig, RelayOutcome};
use nebula_nullables::NullTransport;
use nebula_types::{NodeId, RoutableAddress};

fn config() -> NodeConfig {
    NodeConfig {
        random_seed: 7,
        bucket_size: 1,
        ..NodeConfig::default()
    }
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

/// Two ids that share bucket 0 relative to `local`.
fn bucket_zero_pair(local: NodeId) -> (NodeId, NodeId) {
    let mut a = *local.as_bytes();
    a[0] ^= 0x80;
    let mut b = a;
    b[31] ^= 0x01;
    (NodeId::new(a), NodeId::new(b))
}

fn addr(last: u8) -> RoutableAddress {
    format!("/ip4/10.0.1.{last}/tcp/8680").parse().unwrap()
}

fn table_has(node: &Node<NullTransport>, id: &NodeId) -> bool {
    node.routing_table()
        .try_read()
        .map(|t| t.contains(id))
        .unwrap_or(false)
}

fn liveness_of(node: &Node<NullTransport>, id: &NodeId) -> Option<Liveness> {
    node.routing_table()
        .try_read()
        .ok()
        .and_then(|t| t.get(id).map(|r| r.liveness))
}

#[tokio::test]
async fn departed_peer_gives_way_to_newcomer() {
    let mut node = Node::new(config(), NullTransport::new()).await.unwrap();
    node.start().await.unwrap();
    let (a, b) = bucket_zero_pair(node.id());

    let link = node.transport().open_inbound(a, addr(1));
    wait_until(|| table_has(&node, &a)).await;

    node.transport().disconnect(&link);
    wait_until(|| liveness_of(&node, &a) == Some(Liveness::Failed)).await;
    assert!(node.registry().is_empty());

    node.transport().open_inbound(b, addr(2));
    wait_until(|| table_has(&node, &b)).await;
    assert!(!table_has(&node, &a));
    assert!(node.transport().dial_attempts().is_empty());
}

#[tokio::test]
async fn unreachable_occupant_is_replaced_after_failed_check() {
    let mut node = Node::new(config(), NullTransport::new()).await.unwrap();
    node.start().await.unwrap();
    let (a, b) = bucket_zero_pair(node.id());

    node.transport().open_inbound(a, addr(1));
    wait_until(|| table_has(&node, &a)).await;
    assert_eq!(liveness_of(&node, &a), Some(Liveness::Unknown));

    node.transport().set_unreachable(true);
    node.transport().open_inbound(b, addr(2));
    wait_until(|| table_has(&node, &b)).await;
    assert!(!table_has(&node, &a));

    let dials = node.transport().dial_attempts();
    assert_eq!(dials.len(), 1);
    assert_eq!(dials[0].peer, a);
    assert_eq!(dials[0].addrs, vec![addr(1)]);
}

#[tokio::test]
async fn answering_occupant_keeps_its_slot() {
    let cfg = config();
    let transport = NullTransport::new();
    let mut node = Node::new(cfg.clone(), transport).await.unwrap();
    node.start().await.unwrap();
    let (a, b) = bucket_zero_pair(node.id());
    node.transport().answer_hellos_with(HelloAck {
        chain_id: cfg.chain_id,
        version: cfg.version,
        node_id: a,
    });

    let inbound = node.transport().open_inbound(a, addr(1));
    wait_until(|| table_has(&node, &a)).await;

    node.transport().open_inbound(b, addr(2));
    wait_until(|| liveness_of(&node, &a) == Some(Liveness::Live)).await;
    assert!(!table_has(&node, &b));

    // The check ran on its own link, which is closed again afterwards.
    let closed = node.transport().closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].peer, a);
    wait_until(|| node.registry().connection_count(&inbound.key()) == 1).await;
    assert_eq!(node.registry().get_stream(&inbound.key()), Some(inbound));
}

#[tokio::test]
async fn refresh_revives_a_peer_marked_failed() {
    let mut node = Node::new(config(), NullTransport::new()).await.unwrap();
    node.start().await.unwrap();
    let (a, _) = bucket_zero_pair(node.id());

    let first = node.transport().open_inbound(a, addr(1));
    wait_until(|| table_has(&node, &a)).await;
    node.transport().disconnect(&first);
    wait_until(|| liveness_of(&node, &a) == Some(Liveness::Failed)).await;

    node.transport().open_inbound(a, addr(1));
    wait_until(|| liveness_of(&node, &a) == Some(Liveness::Live)).await;
}

#[tokio::test]
async fn surviving_link_takes_over_when_attached_one_closes() {
    let mut node = Node::new(config(), NullTransport::new()).await.unwrap();
    node.start().await.unwrap();
    let peer = NodeId::new([0x42; 32]);

    let older = node.transport().open_inbound(peer, addr(7));
    let newer = node.transport().open_inbound(peer, addr(7));
    let key = older.key();
    wait_until(|| node.registry().connection_count(&key) == 2).await;
    assert_eq!(node.registry().get_stream(&key), Some(newer.clone()));

    node.transport().disconnect(&newer);
    wait_until(|| node.registry().connection_count(&key) == 1).await;
    assert_eq!(node.registry().get_stream(&key), Some(older.clone()));

    assert_eq!(
        node.broadcast(b"still here".to_vec()).await.unwrap(),
        RelayOutcome::Forwarded(1)
    );
    let sent = node.transport().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, older);
}

#[tokio::test(start_paused = true)]
async fn failed_handshake_leaves_no_registered_link() {
    let (trusted_addr, trusted) = (addr(9), NodeId::new([0xEE; 32]));
    let cfg = NodeConfig {
        random_seed: 7,
        ..NodeConfig::default()
    };
    let transport = NullTransport::new();
    transport.answer_hellos_with(HelloAck {
        chain_id: cfg.chain_id,
        version: cfg.version,
        node_id: NodeId::new([0x66; 32]),
    });
    let mut node = Node::new(cfg, transport).await.unwrap();
    node.start().await.unwrap();

    let trusted_uri = MultiaddrCodec.encode(&trusted_addr, &trusted);
    assert!(node.say_hello(&trusted_uri).await.is_err());
    assert_eq!(node.transport().closed().len(), 3);

    // Events are handled in order, so once this link shows up every
    // earlier open and close has been applied.
    let marker = node.transport().open_inbound(NodeId::new([0x31; 32]), addr(3));
    wait_until(|| node.registry().connection_count(&marker.key()) == 1).await;
    assert_eq!(node.registry().len(), 1);

    assert_eq!(
        node.broadcast(b"hello".to_vec()).await.unwrap(),
        RelayOutcome::Forwarded(1)
    );
    let sent = node.transport().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, marker);
}
