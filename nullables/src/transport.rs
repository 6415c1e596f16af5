//! In-memory transport that records dials and frames instead of touching sockets.
//!
//! Dials succeed unless scripted to fail. Requests are answered from a
//! queue of canned replies, falling back to the configured hello ack.
//! Tests drive inbound traffic by emitting [`ConnectionEvent`]s.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use nebula_network::{ConnectionEvent, HelloAck, Transport, TransportError, WireMessage};
use nebula_types::{ConnectionKey, NodeId, RoutableAddress};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// A fake link. Equality is by stream id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NullStream {
    pub id: u64,
    pub peer: NodeId,
    pub address: RoutableAddress,
}

impl NullStream {
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(&self.address, &self.peer)
    }
}

/// One recorded call to [`Transport::dial`].
#[derive(Clone, Debug)]
pub struct DialRecord {
    pub peer: NodeId,
    pub addrs: Vec<RoutableAddress>,
    pub at: Instant,
}

pub struct NullTransport {
    listen_addrs: Mutex<Vec<RoutableAddress>>,
    greeting: Mutex<Option<HelloAck>>,
    dial_failures: Mutex<VecDeque<TransportError>>,
    unreachable: Mutex<bool>,
    hello_ack: Mutex<Option<HelloAck>>,
    replies: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
    dials: Mutex<Vec<DialRecord>>,
    requests: Mutex<Vec<(NullStream, Vec<u8>)>>,
    sent: Mutex<Vec<(NullStream, Vec<u8>)>>,
    closed: Mutex<Vec<NullStream>>,
    events: broadcast::Sender<ConnectionEvent<NullStream>>,
    next_stream: AtomicU64,
    shut_down: Mutex<bool>,
}

impl NullTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            listen_addrs: Mutex::new(Vec::new()),
            greeting: Mutex::new(None),
            dial_failures: Mutex::new(VecDeque::new()),
            unreachable: Mutex::new(false),
            hello_ack: Mutex::new(None),
            replies: Mutex::new(VecDeque::new()),
            dials: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            events,
            next_stream: AtomicU64::new(1),
            shut_down: Mutex::new(false),
        }
    }

    // -- Scripting ------------------------------------------------------------

    /// Make every dial fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock() = unreachable;
    }

    /// Make the next `n` dials fail, then succeed again.
    pub fn fail_next_dials(&self, n: usize) {
        let mut failures = self.dial_failures.lock();
        for _ in 0..n {
            failures.push_back(TransportError::Dial {
                peer: "scripted".into(),
                reason: "connection refused".into(),
            });
        }
    }

    /// Answer every request that has no queued reply with `ack`.
    pub fn answer_hellos_with(&self, ack: HelloAck) {
        *self.hello_ack.lock() = Some(ack);
    }

    /// Queue a one-shot reply, served before the hello ack fallback.
    pub fn queue_reply(&self, reply: Result<Vec<u8>, TransportError>) {
        self.replies.lock().push_back(reply);
    }

    /// Publish an event to every subscriber.
    pub fn emit(&self, event: ConnectionEvent<NullStream>) {
        let _ = self.events.send(event);
    }

    /// Simulate a peer connecting to us. Returns the new stream.
    pub fn open_inbound(&self, peer: NodeId, address: RoutableAddress) -> NullStream {
        let stream = self.new_stream(peer, address);
        self.emit(ConnectionEvent::Opened {
            key: stream.key(),
            peer,
            address,
            stream: stream.clone(),
            inbound: true,
        });
        stream
    }

    /// Simulate the remote end dropping a link.
    pub fn disconnect(&self, stream: &NullStream) {
        self.emit(ConnectionEvent::Closed {
            key: stream.key(),
            peer: stream.peer,
            stream: stream.clone(),
        });
    }

    /// Simulate a frame arriving on `stream`.
    pub fn deliver(&self, stream: &NullStream, message: WireMessage) {
        self.emit(ConnectionEvent::Frame {
            key: stream.key(),
            peer: stream.peer,
            message,
        });
    }

    // -- Inspection -----------------------------------------------------------

    pub fn dial_attempts(&self) -> Vec<DialRecord> {
        self.dials.lock().clone()
    }

    pub fn requests(&self) -> Vec<(NullStream, Vec<u8>)> {
        self.requests.lock().clone()
    }

    pub fn sent(&self) -> Vec<(NullStream, Vec<u8>)> {
        self.sent.lock().clone()
    }

    /// Links torn down locally through [`Transport::close`].
    pub fn closed(&self) -> Vec<NullStream> {
        self.closed.lock().clone()
    }

    pub fn greeting(&self) -> Option<HelloAck> {
        self.greeting.lock().clone()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shut_down.lock()
    }

    fn new_stream(&self, peer: NodeId, address: RoutableAddress) -> NullStream {
        NullStream {
            id: self.next_stream.fetch_add(1, Ordering::Relaxed),
            peer,
            address,
        }
    }
}

impl Default for NullTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for NullTransport {
    type Stream = NullStream;

    async fn listen(
        &self,
        addr: RoutableAddress,
        greeting: HelloAck,
    ) -> Result<RoutableAddress, TransportError> {
        self.listen_addrs.lock().push(addr);
        *self.greeting.lock() = Some(greeting);
        Ok(addr)
    }

    fn listen_addrs(&self) -> Vec<RoutableAddress> {
        self.listen_addrs.lock().clone()
    }

    async fn dial(
        &self,
        peer: NodeId,
        addrs: &[RoutableAddress],
    ) -> Result<NullStream, TransportError> {
        self.dials.lock().push(DialRecord {
            peer,
            addrs: addrs.to_vec(),
            at: Instant::now(),
        });

        if *self.unreachable.lock() {
            return Err(TransportError::Dial {
                peer: peer.to_string(),
                reason: "unreachable".into(),
            });
        }
        if let Some(err) = self.dial_failures.lock().pop_front() {
            return Err(err);
        }
        let Some(address) = addrs.first().copied() else {
            return Err(TransportError::Dial {
                peer: peer.to_string(),
                reason: "no known address".into(),
            });
        };

        let stream = self.new_stream(peer, address);
        self.emit(ConnectionEvent::Opened {
            key: stream.key(),
            peer,
            address,
            stream: stream.clone(),
            inbound: false,
        });
        Ok(stream)
    }

    async fn request(
        &self,
        stream: &NullStream,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        self.requests.lock().push((stream.clone(), payload));
        if let Some(reply) = self.replies.lock().pop_front() {
            return reply;
        }
        let ack = self.hello_ack.lock().clone();
        match ack {
            Some(ack) => WireMessage::HelloAck(ack)
                .encode()
                .map_err(|e| TransportError::Io(e.to_string())),
            None => Err(TransportError::Timeout("request".into())),
        }
    }

    async fn send(&self, stream: &NullStream, payload: Vec<u8>) -> Result<(), TransportError> {
        self.sent.lock().push((stream.clone(), payload));
        Ok(())
    }

    async fn close(&self, stream: &NullStream) {
        self.closed.lock().push(stream.clone());
        self.disconnect(stream);
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent<NullStream>> {
        self.events.subscribe()
    }

    fn shutdown(&self) {
        *self.shut_down.lock() = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> RoutableAddress {
        "/ip4/10.1.1.1/tcp/8680".parse().unwrap()
    }

    #[tokio::test]
    async fn scripted_dial_failures_then_success() {
        let transport = NullTransport::new();
        let peer = NodeId::new([1u8; 32]);
        transport.fail_next_dials(1);

        assert!(transport.dial(peer, &[addr()]).await.is_err());
        let stream = transport.dial(peer, &[addr()]).await.unwrap();
        assert_eq!(stream.peer, peer);
        assert_eq!(transport.dial_attempts().len(), 2);
    }

    #[tokio::test]
    async fn dial_publishes_opened_event() {
        let transport = NullTransport::new();
        let mut events = transport.subscribe();
        let peer = NodeId::new([2u8; 32]);
        let stream = transport.dial(peer, &[addr()]).await.unwrap();

        match events.recv().await.unwrap() {
            ConnectionEvent::Opened { key, inbound, .. } => {
                assert_eq!(key, stream.key());
                assert!(!inbound);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn queued_reply_wins_over_hello_ack() {
        let transport = NullTransport::new();
        let peer = NodeId::new([3u8; 32]);
        transport.answer_hellos_with(HelloAck {
            chain_id: 1,
            version: 1,
            node_id: peer,
        });
        transport.queue_reply(Err(TransportError::Closed));
        let stream = transport.dial(peer, &[addr()]).await.unwrap();

        assert_eq!(
            transport.request(&stream, vec![1]).await,
            Err(TransportError::Closed)
        );
        let reply = transport.request(&stream, vec![2]).await.unwrap();
        assert!(matches!(
            WireMessage::decode(&reply).unwrap(),
            WireMessage::HelloAck(_)
        ));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn close_records_and_reports_the_link() {
        let transport = NullTransport::new();
        let peer = NodeId::new([4u8; 32]);
        let stream = transport.dial(peer, &[addr()]).await.unwrap();
        let mut events = transport.subscribe();

        transport.close(&stream).await;

        assert_eq!(transport.closed(), vec![stream.clone()]);
        match events.recv().await.unwrap() {
            ConnectionEvent::Closed { stream: closed, .. } => assert_eq!(closed, stream),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
