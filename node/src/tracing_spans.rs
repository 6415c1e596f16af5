//! Pre-built [`tracing::Span`] constructors for common node operations.
//!
//! Consistent span names and fields make it easy to filter and correlate
//! traces across the membership layer.

use tracing::{info_span, Span};

/// Span covering one bootstrap hello, retries included.
pub fn handshake_span(trusted: &str) -> Span {
    info_span!("handshake", trusted = %trusted)
}

/// Span covering the handling of one inbound gossip frame.
pub fn gossip_recv_span(source: &str) -> Span {
    info_span!("gossip_recv", source = %source)
}

/// Span covering the forwarding of one payload to connected peers.
pub fn broadcast_span(checksum: &str, peer_count: usize) -> Span {
    info_span!("broadcast", checksum = %checksum, peer_count = %peer_count)
}
