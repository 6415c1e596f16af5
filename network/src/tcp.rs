//! TCP implementation of [`Transport`].
//!
//! Each link gets a background read loop. Replies to an outstanding
//! [`Transport::request`] are routed back to the caller; gossip and
//! everything unsolicited is published as a [`ConnectionEvent::Frame`].
//! An inbound link must open with a [`Hello`] for the listener's chain.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nebula_types::{ConnectionKey, NodeId, RoutableAddress};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot, watch, Mutex};

use crate::transport::{ConnectionEvent, Transport, TransportError};
use crate::wire::{read_frame, write_frame, Hello, HelloAck, WireMessage};

/// Timeout for the initial TCP connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an accepted socket has to send its hello.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_CAPACITY: usize = 1024;

type Events = broadcast::Sender<ConnectionEvent<TcpStreamHandle>>;

struct StreamInner {
    key: ConnectionKey,
    peer: NodeId,
    writer: Mutex<OwnedWriteHalf>,
    pending: parking_lot::Mutex<Option<oneshot::Sender<Vec<u8>>>>,
    closing: watch::Sender<bool>,
}

/// Shared handle to one TCP link.
#[derive(Clone)]
pub struct TcpStreamHandle {
    inner: Arc<StreamInner>,
}

impl TcpStreamHandle {
    fn new(key: ConnectionKey, peer: NodeId, writer: OwnedWriteHalf) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                key,
                peer,
                writer: Mutex::new(writer),
                pending: parking_lot::Mutex::new(None),
                closing: watch::channel(false).0,
            }),
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.inner.key
    }

    pub fn peer(&self) -> NodeId {
        self.inner.peer
    }

    async fn write(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.inner.writer.lock().await;
        write_frame(&mut *writer, payload).await?;
        Ok(())
    }
}

impl PartialEq for TcpStreamHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for TcpStreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpStreamHandle")
            .field("key", &self.inner.key)
            .finish()
    }
}

pub struct TcpTransport {
    events: Events,
    listen_addrs: parking_lot::Mutex<Vec<RoutableAddress>>,
    greeting: parking_lot::Mutex<Option<HelloAck>>,
    shutdown: watch::Sender<bool>,
}

impl TcpTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            events,
            listen_addrs: parking_lot::Mutex::new(Vec::new()),
            greeting: parking_lot::Mutex::new(None),
            shutdown,
        }
    }

    fn open(
        &self,
        socket: TcpStream,
        peer: NodeId,
        address: RoutableAddress,
        inbound: bool,
    ) -> TcpStreamHandle {
        let (reader, writer) = socket.into_split();
        let key = ConnectionKey::new(&address, &peer);
        let handle = TcpStreamHandle::new(key.clone(), peer, writer);
        let _ = self.events.send(ConnectionEvent::Opened {
            key,
            peer,
            address,
            stream: handle.clone(),
            inbound,
        });
        tokio::spawn(read_loop(
            reader,
            handle.clone(),
            self.greeting.lock().clone(),
            self.events.clone(),
            self.shutdown.subscribe(),
        ));
        handle
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStreamHandle;

    async fn listen(
        &self,
        addr: RoutableAddress,
        greeting: HelloAck,
    ) -> Result<RoutableAddress, TransportError> {
        let listener = TcpListener::bind(addr.socket_addr())
            .await
            .map_err(|e| TransportError::Listen {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        let bound = RoutableAddress::from(listener.local_addr()?);
        self.listen_addrs.lock().push(bound);
        *self.greeting.lock() = Some(greeting.clone());

        tracing::info!(addr = %bound, "listening for peers");
        tokio::spawn(accept_loop(
            listener,
            greeting,
            self.events.clone(),
            self.shutdown.subscribe(),
        ));
        Ok(bound)
    }

    fn listen_addrs(&self) -> Vec<RoutableAddress> {
        self.listen_addrs.lock().clone()
    }

    async fn dial(
        &self,
        peer: NodeId,
        addrs: &[RoutableAddress],
    ) -> Result<TcpStreamHandle, TransportError> {
        let mut last = TransportError::Dial {
            peer: peer.to_string(),
            reason: "no known address".into(),
        };
        for addr in addrs {
            match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr.socket_addr()))
                .await
            {
                Ok(Ok(socket)) => {
                    tracing::debug!(peer = %peer, addr = %addr, "dialed peer");
                    return Ok(self.open(socket, peer, *addr, false));
                }
                Ok(Err(e)) => {
                    last = TransportError::Dial {
                        peer: peer.to_string(),
                        reason: format!("{addr}: {e}"),
                    };
                }
                Err(_) => last = TransportError::Timeout(format!("connect to {addr}")),
            }
        }
        Err(last)
    }

    async fn request(
        &self,
        stream: &TcpStreamHandle,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        let (tx, rx) = oneshot::channel();
        *stream.inner.pending.lock() = Some(tx);
        if let Err(e) = stream.write(&payload).await {
            stream.inner.pending.lock().take();
            return Err(e);
        }
        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                stream.inner.pending.lock().take();
                Err(TransportError::Timeout("request".into()))
            }
        }
    }

    async fn send(&self, stream: &TcpStreamHandle, payload: Vec<u8>) -> Result<(), TransportError> {
        stream.write(&payload).await
    }

    async fn close(&self, stream: &TcpStreamHandle) {
        stream.inner.closing.send_replace(true);
        stream.inner.pending.lock().take();
        let mut writer = stream.inner.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::trace!(key = %stream.key(), error = %e, "write half already gone");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent<TcpStreamHandle>> {
        self.events.subscribe()
    }

    fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    greeting: HelloAck,
    events: Events,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, remote)) => {
                    tracing::trace!(%remote, "accepted connection");
                    tokio::spawn(serve_inbound(
                        socket,
                        greeting.clone(),
                        events.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("accept loop stopped");
}

/// Wait for the opening hello, answer it and hand the link to a read loop.
async fn serve_inbound(
    socket: TcpStream,
    greeting: HelloAck,
    events: Events,
    shutdown: watch::Receiver<bool>,
) {
    let remote = socket.peer_addr().ok();
    let (mut reader, writer) = socket.into_split();

    let hello = match tokio::time::timeout(HELLO_TIMEOUT, read_frame(&mut reader)).await {
        Ok(Ok(bytes)) => match WireMessage::decode(&bytes) {
            Ok(WireMessage::Hello(hello)) => hello,
            _ => {
                tracing::warn!(?remote, "inbound link did not open with hello");
                return;
            }
        },
        Ok(Err(e)) => {
            tracing::debug!(?remote, error = %e, "inbound link closed before hello");
            return;
        }
        Err(_) => {
            tracing::debug!(?remote, "inbound hello timed out");
            return;
        }
    };

    if hello.chain_id != greeting.chain_id {
        tracing::warn!(
            peer = %hello.node_id,
            chain_id = hello.chain_id,
            expected = greeting.chain_id,
            "refusing peer from another chain"
        );
        return;
    }

    let key = ConnectionKey::new(&hello.listen_addr, &hello.node_id);
    let handle = TcpStreamHandle::new(key.clone(), hello.node_id, writer);
    if let Err(e) = answer_hello(&handle, &greeting).await {
        tracing::debug!(peer = %hello.node_id, error = %e, "failed to answer hello");
        return;
    }

    let _ = events.send(ConnectionEvent::Opened {
        key,
        peer: hello.node_id,
        address: hello.listen_addr,
        stream: handle.clone(),
        inbound: true,
    });
    read_loop(reader, handle, Some(greeting), events, shutdown).await;
}

async fn answer_hello(handle: &TcpStreamHandle, greeting: &HelloAck) -> Result<(), TransportError> {
    let ack = WireMessage::HelloAck(greeting.clone())
        .encode()
        .map_err(|e| TransportError::Io(e.to_string()))?;
    handle.write(&ack).await
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    handle: TcpStreamHandle,
    greeting: Option<HelloAck>,
    events: Events,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut closing = handle.inner.closing.subscribe();
    loop {
        let bytes = tokio::select! {
            frame = read_frame(&mut reader) => match frame {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!(key = %handle.key(), error = %e, "link closed");
                    break;
                }
            },
            _ = shutdown.changed() => break,
            _ = closing.wait_for(|closed| *closed) => break,
        };

        let message = match WireMessage::decode(&bytes) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(key = %handle.key(), error = %e, "undecodable frame");
                continue;
            }
        };

        match message {
            WireMessage::Hello(hello) => {
                if let Some(greeting) = &greeting {
                    if on_repeat_hello(&handle, &hello, greeting).await.is_err() {
                        break;
                    }
                }
            }
            WireMessage::Gossip { .. } => publish_frame(&events, &handle, message),
            reply => {
                let pending = handle.inner.pending.lock().take();
                match pending {
                    Some(tx) => {
                        let _ = tx.send(bytes);
                    }
                    None => publish_frame(&events, &handle, reply),
                }
            }
        }
    }

    handle.inner.pending.lock().take();
    let _ = events.send(ConnectionEvent::Closed {
        key: handle.key().clone(),
        peer: handle.peer(),
        stream: handle,
    });
}

async fn on_repeat_hello(
    handle: &TcpStreamHandle,
    hello: &Hello,
    greeting: &HelloAck,
) -> Result<(), TransportError> {
    if hello.chain_id != greeting.chain_id {
        return Err(TransportError::Closed);
    }
    answer_hello(handle, greeting).await
}

fn publish_frame(events: &Events, handle: &TcpStreamHandle, message: WireMessage) {
    let _ = events.send(ConnectionEvent::Frame {
        key: handle.key().clone(),
        peer: handle.peer(),
        message,
    });
}
