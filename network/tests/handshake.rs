//! Bootstrap handshake against the nullable transport.

use std::sync::Arc;
use std::time::Duration;

use nebula_network::{
    AddressCodec, AttemptError, BootstrapHandshake, HandshakeError, HandshakeState, Hello,
    HelloAck, MultiaddrCodec, PeerStore, RoutingTable, Transport, TransportError, WireMessage,
};
use nebula_nullables::NullTransport;
use nebula_types::{AddressTtl, NodeId, RoutableAddress};
use tokio::sync::RwLock;

const CHAIN_ID: u32 = 100;

struct Fixture {
    transport: Arc<NullTransport>,
    table: Arc<RwLock<RoutingTable>>,
    store: Arc<PeerStore>,
    local: Hello,
}

impl Fixture {
    fn new() -> Self {
        Self::with_bucket_size(16)
    }

    fn with_bucket_size(bucket_size: usize) -> Self {
        let local_id = NodeId::new([0x11; 32]);
        Self {
            transport: Arc::new(NullTransport::new()),
            table: Arc::new(RwLock::new(RoutingTable::new(
                local_id,
                bucket_size,
                Duration::from_millis(500),
            ))),
            store: Arc::new(PeerStore::new()),
            local: Hello {
                chain_id: CHAIN_ID,
                version: 1,
                node_id: local_id,
                listen_addr: "/ip4/127.0.0.1/tcp/8680".parse().unwrap(),
            },
        }
    }

    fn handshake(&self) -> BootstrapHandshake<NullTransport> {
        BootstrapHandshake::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.table),
            Arc::clone(&self.store),
            self.local.clone(),
        )
    }
}

fn trusted_peer() -> (RoutableAddress, NodeId, String) {
    let addr: RoutableAddress = "/ip4/10.0.0.2/tcp/8680".parse().unwrap();
    let id = NodeId::new([0xEE; 32]);
    let text = MultiaddrCodec.encode(&addr, &id);
    (addr, id, text)
}

fn ack_from(id: NodeId) -> HelloAck {
    HelloAck {
        chain_id: CHAIN_ID,
        version: 1,
        node_id: id,
    }
}

#[tokio::test]
async fn successful_hello_promotes_peer_to_permanent() {
    let fx = Fixture::new();
    let (addr, id, text) = trusted_peer();
    fx.transport.answer_hellos_with(ack_from(id));

    let mut hs = fx.handshake();
    assert_eq!(hs.run(&text).await.unwrap(), id);
    assert_eq!(hs.state(), HandshakeState::Greeted);
    assert_eq!(hs.attempts(), 1);

    assert_eq!(fx.store.ttl_of(&id, &addr), Some(AddressTtl::Permanent));
    let table = fx.table.read().await;
    assert_eq!(table.get(&id).unwrap().ttl, AddressTtl::Permanent);

    assert!(fx.transport.closed().is_empty());
    let requests = fx.transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        WireMessage::decode(&requests[0].1).unwrap(),
        WireMessage::Hello(fx.local.clone())
    );
}

#[tokio::test(start_paused = true)]
async fn unreachable_trusted_node_fails_after_three_spaced_attempts() {
    let fx = Fixture::new();
    let (addr, id, text) = trusted_peer();
    fx.transport.set_unreachable(true);

    let mut hs = fx.handshake();
    let err = hs.run(&text).await.unwrap_err();

    match err {
        HandshakeError::Failed { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(
                last,
                AttemptError::Transport(TransportError::Dial { .. })
            ));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(hs.state(), HandshakeState::Failed);

    let dials = fx.transport.dial_attempts();
    assert_eq!(dials.len(), 3);
    for pair in dials.windows(2) {
        let gap = pair[1].at - pair[0].at;
        assert!(gap >= Duration::from_secs(1), "gap {gap:?}");
        assert!(gap < Duration::from_millis(1100), "gap {gap:?}");
    }

    assert_eq!(fx.store.ttl_of(&id, &addr), Some(AddressTtl::Ephemeral));
    assert!(!fx.table.read().await.contains(&id));
}

#[tokio::test(start_paused = true)]
async fn recovers_when_a_later_attempt_succeeds() {
    let fx = Fixture::new();
    let (_, id, text) = trusted_peer();
    fx.transport.fail_next_dials(2);
    fx.transport.answer_hellos_with(ack_from(id));

    let mut hs = fx.handshake();
    hs.run(&text).await.unwrap();
    assert_eq!(hs.attempts(), 3);
    assert_eq!(hs.state(), HandshakeState::Greeted);
}

#[tokio::test]
async fn self_bootstrap_makes_no_network_call() {
    let fx = Fixture::new();
    let text = MultiaddrCodec.encode(&fx.local.listen_addr, &NodeId::new([0x22; 32]));

    let mut hs = fx.handshake();
    hs.run(&text).await.unwrap();
    assert_eq!(hs.state(), HandshakeState::Greeted);
    assert!(fx.transport.dial_attempts().is_empty());
    assert!(fx.table.read().await.is_empty());
}

#[tokio::test]
async fn own_id_is_treated_as_self_bootstrap() {
    let fx = Fixture::new();
    let other_addr: RoutableAddress = "/ip4/10.9.9.9/tcp/1".parse().unwrap();
    let text = MultiaddrCodec.encode(&other_addr, &fx.local.node_id);

    let mut hs = fx.handshake();
    hs.run(&text).await.unwrap();
    assert!(fx.transport.dial_attempts().is_empty());
}

#[tokio::test]
async fn listening_address_counts_as_self() {
    let fx = Fixture::new();
    let bound: RoutableAddress = "/ip4/192.168.1.5/tcp/9000".parse().unwrap();
    fx.transport
        .listen(bound, ack_from(fx.local.node_id))
        .await
        .unwrap();
    let text = MultiaddrCodec.encode(&bound, &NodeId::new([0x33; 32]));

    let mut hs = fx.handshake();
    hs.run(&text).await.unwrap();
    assert!(fx.transport.dial_attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn ack_from_wrong_peer_counts_as_failure() {
    let fx = Fixture::new();
    let (_, _, text) = trusted_peer();
    fx.transport.answer_hellos_with(ack_from(NodeId::new([0x44; 32])));

    let mut hs = fx.handshake();
    match hs.run(&text).await.unwrap_err() {
        HandshakeError::Failed { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(last, AttemptError::UnexpectedPeer { .. }));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let dialed = fx.transport.requests();
    assert_eq!(dialed.len(), 3);
    let closed = fx.transport.closed();
    assert_eq!(closed.len(), 3);
    for (stream, _) in &dialed {
        assert!(closed.contains(stream));
    }
}

#[tokio::test(start_paused = true)]
async fn ack_from_other_chain_counts_as_failure() {
    let fx = Fixture::new();
    let (_, id, text) = trusted_peer();
    fx.transport.answer_hellos_with(HelloAck {
        chain_id: CHAIN_ID + 1,
        ..ack_from(id)
    });

    let mut hs = fx.handshake();
    match hs.run(&text).await.unwrap_err() {
        HandshakeError::Failed { last, .. } => {
            assert_eq!(
                last,
                AttemptError::ChainMismatch {
                    expected: CHAIN_ID,
                    actual: CHAIN_ID + 1
                }
            );
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn malformed_trusted_address_is_rejected_up_front() {
    let fx = Fixture::new();
    let mut hs = fx.handshake();
    assert!(matches!(
        hs.run("/ip4/10.0.0.2/tcp/8680").await,
        Err(HandshakeError::Address(_))
    ));
    assert_eq!(hs.state(), HandshakeState::Uninitialized);
    assert!(fx.store.is_empty());
    assert!(fx.transport.dial_attempts().is_empty());
}

/// Ids sharing bucket 0 with the trusted peer relative to the fixture id.
fn bucket_zero_id(n: u8) -> NodeId {
    let mut bytes = [0x91u8; 32];
    bytes[31] = n;
    NodeId::new(bytes)
}

#[tokio::test]
async fn trusted_node_displaces_ephemeral_peer_in_full_bucket() {
    let fx = Fixture::with_bucket_size(1);
    let (_, id, text) = trusted_peer();
    let occupant = bucket_zero_id(1);
    fx.table.write().await.update(occupant);
    fx.transport.answer_hellos_with(ack_from(id));

    let mut hs = fx.handshake();
    hs.run(&text).await.unwrap();

    let table = fx.table.read().await;
    assert_eq!(table.get(&id).unwrap().ttl, AddressTtl::Permanent);
    assert!(!table.contains(&occupant));
}

#[tokio::test]
async fn bucket_full_of_permanent_peers_fails_the_handshake() {
    let fx = Fixture::with_bucket_size(1);
    let (addr, id, text) = trusted_peer();
    fx.table
        .write()
        .await
        .update_with_ttl(bucket_zero_id(1), AddressTtl::Permanent);
    fx.transport.answer_hellos_with(ack_from(id));

    let mut hs = fx.handshake();
    assert!(matches!(
        hs.run(&text).await,
        Err(HandshakeError::TableFull { peer }) if peer == id
    ));
    assert_eq!(hs.state(), HandshakeState::Failed);
    assert!(!fx.table.read().await.contains(&id));
    assert_eq!(fx.store.ttl_of(&id, &addr), Some(AddressTtl::Ephemeral));
    assert_eq!(fx.transport.closed().len(), 1);
}
