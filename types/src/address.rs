//! Routable network addresses in multiaddr text form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::TypesError;

/// A dialable transport address: IP plus TCP port.
///
/// Text form follows the multiaddr convention used in trusted-node lists:
/// `/ip4/127.0.0.1/tcp/8680` or `/ip6/::1/tcp/8680`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoutableAddress(SocketAddr);

impl RoutableAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(ip, port))
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for RoutableAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for RoutableAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.ip() {
            IpAddr::V4(ip) => write!(f, "/ip4/{}/tcp/{}", ip, self.0.port()),
            IpAddr::V6(ip) => write!(f, "/ip6/{}/tcp/{}", ip, self.0.port()),
        }
    }
}

impl FromStr for RoutableAddress {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypesError::InvalidAddress(s.to_string());

        let mut parts = s.split('/');
        if parts.next() != Some("") {
            return Err(invalid());
        }
        let (Some(family), Some(ip), Some("tcp"), Some(port), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(invalid());
        };

        let ip: IpAddr = match family {
            "ip4" => IpAddr::V4(ip.parse().map_err(|_| invalid())?),
            "ip6" => IpAddr::V6(ip.parse().map_err(|_| invalid())?),
            _ => return Err(invalid()),
        };
        let port: u16 = port.parse().map_err(|_| invalid())?;

        Ok(Self::new(ip, port))
    }
}
