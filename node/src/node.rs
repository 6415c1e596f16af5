//! The Nebula node: identity, membership state and a transport wired
//! together.
//!
//! [`Node::new`] generates the identity, allocates the routing table, peer
//! store, connection registry and relay cache, and acquires the transport.
//! [`Node::start`] spawns the connection-event pump and greets every trusted
//! node. The pump keeps the registry in step with the transport and relays
//! gossip through the dedup cache.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nebula_crypto::{generate_identity, NodeIdentity};
use nebula_network::{
    AttemptError, BootstrapHandshake, ConnectionEvent, ConnectionRegistry, HandshakeConfig,
    HandshakeError, Hello, HelloAck, PeerStore, RelayDedupCache, RoutingTable, Transport,
    TransportError, UpdateOutcome, WireMessage,
};
use nebula_types::{AddressTtl, ConnectionKey, NodeId, RoutableAddress, Timestamp, TEMP_ADDR_TTL_SECS};
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::NodeConfig;
use crate::metrics::NodeMetrics;
use crate::shutdown::ShutdownController;
use crate::tracing_spans::{broadcast_span, gossip_recv_span, handshake_span};
use crate::NodeError;

/// Capacity of the channel delivering first-seen gossip to local consumers.
const GOSSIP_CHANNEL_CAPACITY: usize = 1024;

/// How often expired peer-store addresses are collected.
const PEER_STORE_GC_INTERVAL: Duration = Duration::from_secs(TEMP_ADDR_TTL_SECS);

/// Lifecycle of a [`Node`]. Construction either yields an `Initialized`
/// node or fails, so the pre-transport phase is never observable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Initialized,
    Running,
    Stopped,
}

impl NodeState {
    fn name(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

/// What happened to a gossip payload handed to the relay path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Already seen; not reprocessed or forwarded.
    Duplicate,
    /// First sighting; forwarded to this many links.
    Forwarded(usize),
}

/// Components shared between the node handle and its background tasks.
struct Membership<T: Transport> {
    local_key: ConnectionKey,
    local_hello: Hello,
    transport: Arc<T>,
    routing_table: Arc<RwLock<RoutingTable>>,
    peer_store: Arc<PeerStore>,
    registry: ConnectionRegistry<T::Stream>,
    relay_cache: RelayDedupCache,
    metrics: NodeMetrics,
    gossip: broadcast::Sender<Vec<u8>>,
    /// Peers with a liveness check in flight.
    checking: Mutex<HashSet<NodeId>>,
}

impl<T: Transport> Membership<T> {
    async fn handle_event(self: &Arc<Self>, event: ConnectionEvent<T::Stream>) {
        match event {
            ConnectionEvent::Opened {
                key,
                peer,
                address,
                stream,
                inbound,
            } => {
                let count = self.registry.on_stream_opened(&key, stream);
                if inbound {
                    self.peer_store
                        .add_addr(peer, address, AddressTtl::Ephemeral, Timestamp::now());
                    let outcome = self.routing_table.write().await.update(peer);
                    tracing::debug!(peer = %peer, ?outcome, "inbound hello");
                    if let UpdateOutcome::Rejected { stale: Some(stale) } = outcome {
                        self.spawn_liveness_check(stale, peer);
                    }
                }
                tracing::debug!(key = %key, count, inbound, "connection opened");
                self.refresh_gauges().await;
            }
            ConnectionEvent::Closed { key, peer, stream } => {
                let remaining = self.registry.on_stream_closed(&key, &stream);
                if remaining == 0 {
                    self.routing_table.write().await.mark_failed(&peer);
                }
                tracing::debug!(key = %key, peer = %peer, remaining, "connection closed");
                self.refresh_gauges().await;
            }
            ConnectionEvent::Frame {
                key,
                message: WireMessage::Gossip { payload },
                ..
            } => {
                let span = gossip_recv_span(key.as_str());
                if let Err(e) = self.relay(payload, key).instrument(span).await {
                    tracing::warn!(error = %e, "gossip relay failed");
                }
            }
            ConnectionEvent::Frame { key, message, .. } => {
                tracing::trace!(key = %key, ?message, "ignoring unsolicited frame");
            }
        }
    }

    async fn relay(&self, payload: Vec<u8>, source: ConnectionKey) -> Result<RelayOutcome, NodeError> {
        let checksum = RelayDedupCache::checksum(&payload);
        if !self.relay_cache.observe(checksum, source.clone()) {
            self.metrics.gossip_duplicates.inc();
            tracing::trace!(%checksum, source = %source, "duplicate gossip dropped");
            return Ok(RelayOutcome::Duplicate);
        }
        if source != self.local_key && self.gossip.receiver_count() > 0 {
            let _ = self.gossip.send(payload.clone());
        }

        let frame = WireMessage::Gossip { payload }.encode()?;
        let skip = self.relay_cache.sources_of(&checksum);
        let targets: Vec<_> = self
            .registry
            .streams()
            .into_iter()
            .filter(|(key, _)| !skip.contains(key))
            .collect();

        let span = broadcast_span(&checksum.to_string(), targets.len());
        let forwarded = async {
            let mut forwarded = 0;
            for (key, stream) in targets {
                match self.transport.send(&stream, frame.clone()).await {
                    Ok(()) => forwarded += 1,
                    Err(e) => tracing::debug!(key = %key, error = %e, "gossip send failed"),
                }
            }
            forwarded
        }
        .instrument(span)
        .await;

        self.metrics.gossip_relayed.inc();
        Ok(RelayOutcome::Forwarded(forwarded))
    }

    /// Ping `stale` in the background, then offer `newcomer` its bucket
    /// again.
    fn spawn_liveness_check(self: &Arc<Self>, stale: NodeId, newcomer: NodeId) {
        if !self.checking.lock().insert(stale) {
            return;
        }
        let membership = Arc::clone(self);
        tokio::spawn(async move {
            let result = membership.ping(stale).await;
            let outcome = {
                let mut table = membership.routing_table.write().await;
                match &result {
                    Ok(rtt) => {
                        table.record_latency(&stale, *rtt);
                    }
                    Err(_) => {
                        table.mark_failed(&stale);
                    }
                }
                table.update(newcomer)
            };
            membership.checking.lock().remove(&stale);
            match result {
                Ok(rtt) => {
                    tracing::debug!(peer = %stale, ?rtt, ?outcome, "liveness check answered")
                }
                Err(e) => {
                    tracing::debug!(peer = %stale, error = %e, ?outcome, "liveness check failed")
                }
            }
            membership.refresh_gauges().await;
        });
    }

    /// Round-trip time of a hello to `peer` on a fresh link.
    async fn ping(&self, peer: NodeId) -> Result<Duration, AttemptError> {
        let addrs = self.peer_store.addrs(&peer, Timestamp::now());
        if addrs.is_empty() {
            return Err(TransportError::Dial {
                peer: peer.to_string(),
                reason: "no known address".into(),
            }
            .into());
        }
        let stream = self.transport.dial(peer, &addrs).await?;
        let result = self.exchange_hello(peer, &stream).await;
        self.transport.close(&stream).await;
        result
    }

    async fn exchange_hello(
        &self,
        peer: NodeId,
        stream: &T::Stream,
    ) -> Result<Duration, AttemptError> {
        let hello = WireMessage::Hello(self.local_hello.clone())
            .encode()
            .map_err(|e| AttemptError::Codec(e.to_string()))?;
        let started = Instant::now();
        let reply = self.transport.request(stream, hello).await?;
        let rtt = started.elapsed();
        match WireMessage::decode(&reply) {
            Ok(WireMessage::HelloAck(ack)) if ack.node_id != peer => {
                Err(AttemptError::UnexpectedPeer {
                    expected: peer,
                    actual: ack.node_id,
                })
            }
            Ok(WireMessage::HelloAck(ack)) if ack.chain_id != self.local_hello.chain_id => {
                Err(AttemptError::ChainMismatch {
                    expected: self.local_hello.chain_id,
                    actual: ack.chain_id,
                })
            }
            Ok(WireMessage::HelloAck(_)) => Ok(rtt),
            Ok(_) => Err(AttemptError::UnexpectedReply),
            Err(e) => Err(AttemptError::Codec(e.to_string())),
        }
    }

    async fn refresh_gauges(&self) {
        self.metrics.peer_count.set(self.registry.len() as i64);
        let size = self.routing_table.read().await.len();
        self.metrics.routing_table_size.set(size as i64);
    }
}

async fn run_event_pump<T: Transport>(
    membership: Arc<Membership<T>>,
    mut events: broadcast::Receiver<ConnectionEvent<T::Stream>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut gc = tokio::time::interval(PEER_STORE_GC_INTERVAL);
    gc.tick().await;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => membership.handle_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "connection event pump lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = gc.tick() => {
                let removed = membership.peer_store.gc_expired(Timestamp::now());
                if removed > 0 {
                    tracing::debug!(removed, "expired peer addresses collected");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("connection event pump stopped");
}

pub struct Node<T: Transport> {
    config: NodeConfig,
    identity: NodeIdentity,
    state: NodeState,
    listen_addr: RoutableAddress,
    membership: Arc<Membership<T>>,
    handshake_config: HandshakeConfig,
    synchronized: AtomicBool,
    sync_list: Mutex<Vec<String>>,
    events: Option<broadcast::Receiver<ConnectionEvent<T::Stream>>>,
    shutdown: ShutdownController,
    task_handles: Vec<JoinHandle<()>>,
}

impl<T: Transport> Node<T> {
    /// Build a node and acquire its transport. Any failure aborts
    /// construction.
    pub async fn new(config: NodeConfig, transport: T) -> Result<Self, NodeError> {
        config.validate()?;

        let identity = generate_identity(config.random_seed)?;
        let id = identity.id();
        tracing::info!(node_id = %id, seeded = config.random_seed != 0, "node identity ready");

        let routing_table = Arc::new(RwLock::new(RoutingTable::new(
            id,
            config.bucket_size,
            config.bucket_latency(),
        )));
        let metrics = NodeMetrics::new()?;
        let transport = Arc::new(transport);
        let events = transport.subscribe();

        let greeting = HelloAck {
            chain_id: config.chain_id,
            version: config.version,
            node_id: id,
        };
        let listen_addr = transport.listen(config.listen_address(), greeting).await?;
        tracing::info!(
            node_id = %id,
            addr = %listen_addr,
            chain_id = config.chain_id,
            "node initialized"
        );

        let (gossip, _) = broadcast::channel(GOSSIP_CHANNEL_CAPACITY);
        let membership = Arc::new(Membership {
            local_key: ConnectionKey::new(&listen_addr, &id),
            local_hello: Hello {
                chain_id: config.chain_id,
                version: config.version,
                node_id: id,
                listen_addr,
            },
            transport,
            routing_table,
            peer_store: Arc::new(PeerStore::new()),
            registry: ConnectionRegistry::new(),
            relay_cache: RelayDedupCache::new(config.relay_cache_size),
            metrics,
            gossip,
            checking: Mutex::new(HashSet::new()),
        });

        Ok(Self {
            config,
            identity,
            state: NodeState::Initialized,
            listen_addr,
            membership,
            handshake_config: HandshakeConfig::default(),
            synchronized: AtomicBool::new(false),
            sync_list: Mutex::new(Vec::new()),
            events: Some(events),
            shutdown: ShutdownController::new(),
            task_handles: Vec::new(),
        })
    }

    /// Override the bootstrap retry policy.
    pub fn with_handshake_config(mut self, config: HandshakeConfig) -> Self {
        self.handshake_config = config;
        self
    }

    /// Spawn the event pump and greet every trusted node. Bootstrap
    /// failures are logged; the node keeps running without them.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if self.state != NodeState::Initialized {
            return Err(self.invalid_state(NodeState::Initialized));
        }
        let Some(events) = self.events.take() else {
            return Err(self.invalid_state(NodeState::Initialized));
        };

        self.task_handles.push(tokio::spawn(run_event_pump(
            Arc::clone(&self.membership),
            events,
            self.shutdown.subscribe(),
        )));
        self.state = NodeState::Running;
        tracing::info!(node_id = %self.id(), trusted = self.config.trusted_nodes.len(), "node started");

        for trusted in self.config.trusted_nodes.clone() {
            if let Err(e) = self.say_hello(&trusted).await {
                tracing::warn!(trusted = %trusted, error = %e, "bootstrap failed, continuing without it");
            }
        }
        Ok(())
    }

    /// Greet a trusted node (`<address>/ipfs/<id>`).
    pub async fn say_hello(&self, trusted: &str) -> Result<NodeId, HandshakeError> {
        let m = &self.membership;
        let mut handshake = BootstrapHandshake::new(
            Arc::clone(&m.transport),
            Arc::clone(&m.routing_table),
            Arc::clone(&m.peer_store),
            m.local_hello.clone(),
        )
        .with_config(self.handshake_config.clone());

        let result = handshake.run(trusted).instrument(handshake_span(trusted)).await;
        match &result {
            Ok(_) => m.metrics.handshakes_succeeded.inc(),
            Err(_) => m.metrics.handshakes_failed.inc(),
        }
        m.refresh_gauges().await;
        result
    }

    /// Flood a locally originated payload to every open link.
    pub async fn broadcast(&self, payload: Vec<u8>) -> Result<RelayOutcome, NodeError> {
        self.require_running()?;
        self.membership
            .relay(payload, self.membership.local_key.clone())
            .await
    }

    /// Forward a payload received on `from`, unless it was already seen.
    pub async fn relay(&self, payload: Vec<u8>, from: ConnectionKey) -> Result<RelayOutcome, NodeError> {
        self.require_running()?;
        self.membership.relay(payload, from).await
    }

    /// Stop background tasks and the transport.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        if self.state == NodeState::Stopped {
            return Ok(());
        }
        tracing::info!(node_id = %self.id(), "node stopping");
        self.shutdown.shutdown();
        self.membership.transport.shutdown();
        for handle in self.task_handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "node task ended abnormally");
            }
        }
        self.state = NodeState::Stopped;
        tracing::info!("node stopped");
        Ok(())
    }

    fn require_running(&self) -> Result<(), NodeError> {
        if self.state == NodeState::Running {
            Ok(())
        } else {
            Err(self.invalid_state(NodeState::Running))
        }
    }

    fn invalid_state(&self, expected: NodeState) -> NodeError {
        NodeError::InvalidState {
            expected: expected.name(),
            actual: self.state.name(),
        }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn id(&self) -> NodeId {
        self.identity.id()
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn listen_addr(&self) -> RoutableAddress {
        self.listen_addr
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::Acquire)
    }

    /// Set by the block-sync side once the local chain has caught up.
    pub fn set_synchronized(&self, synchronized: bool) {
        self.synchronized.store(synchronized, Ordering::Release);
    }

    pub fn sync_list(&self) -> Vec<String> {
        self.sync_list.lock().clone()
    }

    pub fn set_sync_list(&self, list: Vec<String>) {
        *self.sync_list.lock() = list;
    }

    pub fn routing_table(&self) -> Arc<RwLock<RoutingTable>> {
        Arc::clone(&self.membership.routing_table)
    }

    pub fn peer_store(&self) -> &PeerStore {
        &self.membership.peer_store
    }

    pub fn registry(&self) -> &ConnectionRegistry<T::Stream> {
        &self.membership.registry
    }

    pub fn relay_cache(&self) -> &RelayDedupCache {
        &self.membership.relay_cache
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.membership.metrics
    }

    pub fn transport(&self) -> &T {
        &self.membership.transport
    }

    /// Receive gossip payloads from peers on first sighting.
    pub fn subscribe_gossip(&self) -> broadcast::Receiver<Vec<u8>> {
        self.membership.gossip.subscribe()
    }

    /// Up to `count` known peers nearest to `target`.
    pub async fn closest_peers(&self, target: &NodeId, count: usize) -> Vec<NodeId> {
        self.membership
            .routing_table
            .read()
            .await
            .closest_peers(target, count)
    }
}
