//! Transport abstraction the membership layer is written against.
//!
//! A transport listens, dials peers, exchanges request/reply frames on a
//! stream, and reports link lifecycle through a broadcast channel of
//! [`ConnectionEvent`]s.

use async_trait::async_trait;
use nebula_types::{ConnectionKey, NodeId, RoutableAddress};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::wire::{HelloAck, WireMessage};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("listen on {addr} failed: {reason}")]
    Listen { addr: String, reason: String },

    #[error("dial to {peer} failed: {reason}")]
    Dial { peer: String, reason: String },

    #[error("{0} timed out")]
    Timeout(String),

    #[error("stream closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Link lifecycle and inbound traffic as seen by the transport.
#[derive(Clone, Debug)]
pub enum ConnectionEvent<S> {
    Opened {
        key: ConnectionKey,
        peer: NodeId,
        address: RoutableAddress,
        stream: S,
        inbound: bool,
    },
    /// `stream` is the handle that went down; other links on the same key
    /// may still be open.
    Closed {
        key: ConnectionKey,
        peer: NodeId,
        stream: S,
    },
    Frame {
        key: ConnectionKey,
        peer: NodeId,
        message: WireMessage,
    },
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Handle to one open link. Cheap to clone; equal handles name the same
    /// link.
    type Stream: Clone + PartialEq + Send + Sync + 'static;

    /// Start accepting connections on `addr`. Inbound hellos are answered
    /// with `greeting`; hellos from another chain are refused. Returns the
    /// bound address.
    async fn listen(
        &self,
        addr: RoutableAddress,
        greeting: HelloAck,
    ) -> Result<RoutableAddress, TransportError>;

    fn listen_addrs(&self) -> Vec<RoutableAddress>;

    /// Open a link to `peer`, trying `addrs` in order.
    async fn dial(
        &self,
        peer: NodeId,
        addrs: &[RoutableAddress],
    ) -> Result<Self::Stream, TransportError>;

    /// Send one frame and wait for the reply frame.
    async fn request(
        &self,
        stream: &Self::Stream,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError>;

    /// Send one frame without waiting for a reply.
    async fn send(&self, stream: &Self::Stream, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Tear down one link. The transport reports it as
    /// [`ConnectionEvent::Closed`] like any other disconnect.
    async fn close(&self, stream: &Self::Stream);

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent<Self::Stream>>;

    /// Stop accepting connections and close open links.
    fn shutdown(&self) {}
}
