//! Trusted-peer address text: `<routable address>/ipfs/<base58 node id>`.

use nebula_types::{NodeId, RoutableAddress};

use crate::NetworkError;

/// Separator between the transport part and the peer id part.
pub const PEER_ID_PROTOCOL: &str = "/ipfs/";

/// Converts between peer address text and its typed parts.
pub trait AddressCodec: Send + Sync {
    fn decode(&self, text: &str) -> Result<(RoutableAddress, NodeId), NetworkError>;
    fn encode(&self, address: &RoutableAddress, id: &NodeId) -> String;
}

/// Codec for `/ip4/<ip>/tcp/<port>/ipfs/<id>` and its `ip6` twin.
#[derive(Clone, Copy, Debug, Default)]
pub struct MultiaddrCodec;

impl AddressCodec for MultiaddrCodec {
    fn decode(&self, text: &str) -> Result<(RoutableAddress, NodeId), NetworkError> {
        let parse_err = |reason: &str| NetworkError::AddressParse {
            input: text.to_string(),
            reason: reason.to_string(),
        };

        let (transport, id) = text
            .split_once(PEER_ID_PROTOCOL)
            .ok_or_else(|| parse_err("missing /ipfs/<id> component"))?;
        if id.is_empty() || id.contains('/') {
            return Err(parse_err("peer id must be the last component"));
        }

        let address: RoutableAddress = transport
            .parse()
            .map_err(|_| parse_err("unsupported transport address"))?;
        let id = NodeId::from_base58(id).map_err(|e| parse_err(&e.to_string()))?;
        Ok((address, id))
    }

    fn encode(&self, address: &RoutableAddress, id: &NodeId) -> String {
        format!("{address}{PEER_ID_PROTOCOL}{id}")
    }
}
