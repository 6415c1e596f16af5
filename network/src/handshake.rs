//! Bootstrap handshake with a trusted entry node.
//!
//! A fresh node decodes the trusted address, records it as an ephemeral
//! peer-store entry, then dials and exchanges `Hello`/`HelloAck`. Attempts
//! are retried a fixed number of times with a fixed pause between them.
//! Only a successful greeting promotes the peer to a permanent address
//! and a permanent routing-table entry.

use std::sync::Arc;
use std::time::Duration;

use nebula_types::{AddressTtl, NodeId, RoutableAddress, Timestamp};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::address::{AddressCodec, MultiaddrCodec};
use crate::peer_store::PeerStore;
use crate::routing_table::{RoutingTable, UpdateOutcome};
use crate::transport::{Transport, TransportError};
use crate::wire::{Hello, WireMessage};
use crate::NetworkError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Uninitialized,
    Dialing,
    AwaitingGreeting,
    Greeted,
    Failed,
}

#[derive(Clone, Debug)]
pub struct HandshakeConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Why a single hello attempt failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("peer answered as {actual}, expected {expected}")]
    UnexpectedPeer { expected: NodeId, actual: NodeId },

    #[error("peer is on chain {actual}, expected {expected}")]
    ChainMismatch { expected: u32, actual: u32 },

    #[error("reply was not a hello ack")]
    UnexpectedReply,

    #[error("codec error: {0}")]
    Codec(String),
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("bad trusted address: {0}")]
    Address(#[from] NetworkError),

    #[error("hello failed after {attempts} attempts: {last}")]
    Failed { attempts: u32, last: AttemptError },

    #[error("routing table has no room for trusted node {peer}")]
    TableFull { peer: NodeId },
}

pub struct BootstrapHandshake<T: Transport> {
    transport: Arc<T>,
    routing_table: Arc<RwLock<RoutingTable>>,
    peer_store: Arc<PeerStore>,
    codec: Box<dyn AddressCodec>,
    local: Hello,
    config: HandshakeConfig,
    state: HandshakeState,
    attempts: u32,
}

impl<T: Transport> BootstrapHandshake<T> {
    /// `local` is the hello this node introduces itself with.
    pub fn new(
        transport: Arc<T>,
        routing_table: Arc<RwLock<RoutingTable>>,
        peer_store: Arc<PeerStore>,
        local: Hello,
    ) -> Self {
        Self {
            transport,
            routing_table,
            peer_store,
            codec: Box::new(MultiaddrCodec),
            local,
            config: HandshakeConfig::default(),
            state: HandshakeState::Uninitialized,
            attempts: 0,
        }
    }

    pub fn with_config(mut self, config: HandshakeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_codec(mut self, codec: Box<dyn AddressCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Attempts made by the last [`run`](Self::run).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Greet the node behind `trusted` (`<address>/ipfs/<id>`). Returns the
    /// trusted node's id once it has been greeted.
    pub async fn run(&mut self, trusted: &str) -> Result<NodeId, HandshakeError> {
        self.state = HandshakeState::Uninitialized;
        self.attempts = 0;

        let (address, peer) = self.codec.decode(trusted)?;
        self.peer_store
            .add_addr(peer, address, AddressTtl::Ephemeral, Timestamp::now());

        if self.is_self(&address, &peer) {
            tracing::info!(peer = %peer, %address, "trusted node is this node, nothing to greet");
            self.state = HandshakeState::Greeted;
            return Ok(peer);
        }

        let max_attempts = self.config.max_attempts.max(1);
        let stream = loop {
            self.attempts += 1;
            match self.attempt(peer, address).await {
                Ok(stream) => break stream,
                Err(last) if self.attempts >= max_attempts => {
                    self.state = HandshakeState::Failed;
                    self.routing_table.write().await.mark_failed(&peer);
                    tracing::error!(
                        peer = %peer,
                        attempts = self.attempts,
                        error = %last,
                        "hello to trusted node failed"
                    );
                    return Err(HandshakeError::Failed {
                        attempts: self.attempts,
                        last,
                    });
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, attempt = self.attempts, error = %e, "hello attempt failed");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        };

        let outcome = self
            .routing_table
            .write()
            .await
            .update_with_ttl(peer, AddressTtl::Permanent);
        if let UpdateOutcome::Rejected { .. } = outcome {
            self.transport.close(&stream).await;
            self.state = HandshakeState::Failed;
            tracing::error!(peer = %peer, "bucket is full of permanent peers, trusted node not added");
            return Err(HandshakeError::TableFull { peer });
        }
        if let UpdateOutcome::Evicted { evicted } = outcome {
            tracing::info!(peer = %peer, evicted = %evicted, "trusted node displaced a peer");
        }

        self.peer_store
            .add_addr(peer, address, AddressTtl::Permanent, Timestamp::now());
        self.state = HandshakeState::Greeted;
        tracing::info!(peer = %peer, %address, attempts = self.attempts, "greeted trusted node");
        Ok(peer)
    }

    fn is_self(&self, address: &RoutableAddress, peer: &NodeId) -> bool {
        *peer == self.local.node_id
            || self.local.listen_addr == *address
            || self.transport.listen_addrs().contains(address)
    }

    /// One dial and hello exchange. A link that fails the exchange is
    /// closed before the error is returned.
    async fn attempt(
        &mut self,
        peer: NodeId,
        address: RoutableAddress,
    ) -> Result<T::Stream, AttemptError> {
        self.state = HandshakeState::Dialing;
        let stream = self.transport.dial(peer, &[address]).await?;

        self.state = HandshakeState::AwaitingGreeting;
        match self.greet(peer, &stream).await {
            Ok(()) => Ok(stream),
            Err(e) => {
                self.transport.close(&stream).await;
                Err(e)
            }
        }
    }

    async fn greet(&self, peer: NodeId, stream: &T::Stream) -> Result<(), AttemptError> {
        let hello = WireMessage::Hello(self.local.clone())
            .encode()
            .map_err(|e| AttemptError::Codec(e.to_string()))?;
        let reply = self.transport.request(stream, hello).await?;

        let ack = match WireMessage::decode(&reply) {
            Ok(WireMessage::HelloAck(ack)) => ack,
            Ok(_) => return Err(AttemptError::UnexpectedReply),
            Err(e) => return Err(AttemptError::Codec(e.to_string())),
        };
        if ack.node_id != peer {
            return Err(AttemptError::UnexpectedPeer {
                expected: peer,
                actual: ack.node_id,
            });
        }
        if ack.chain_id != self.local.chain_id {
            return Err(AttemptError::ChainMismatch {
                expected: self.local.chain_id,
                actual: ack.chain_id,
            });
        }
        if ack.version != self.local.version {
            tracing::debug!(peer = %peer, version = ack.version, "trusted node runs another protocol version");
        }
        Ok(())
    }
}
