use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use secp256k1::PublicKey;
use url::{Host, Url};

use crate::crypto::{node_id, public_key_from_node_id};
use crate::error::{Error, ProtocolError};

pub const DEFAULT_PORT: u16 = 30303;

/// A remote node given as `enode://<node id hex>@<ip>:<port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PublicKey,
    pub address: SocketAddr,
}

impl Peer {
    pub fn new(id: PublicKey, address: SocketAddr) -> Self {
        Peer { id, address }
    }

    pub fn parse(input: &str) -> Result<Peer, Error> {
        let invalid = |reason: &str| -> Error {
            ProtocolError::InvalidNode {
                url: input.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };

        let url = Url::parse(input).map_err(|err| invalid(&err.to_string()))?;
        if url.scheme() != "enode" {
            return Err(invalid("scheme must be enode"));
        }
        let id = hex::decode(url.username()).map_err(|_| invalid("node id is not hex"))?;
        let id = public_key_from_node_id(&id).map_err(|_| invalid("invalid node id"))?;

        let ip = match url.host() {
            Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
            Some(Host::Ipv6(ip)) => IpAddr::V6(ip),
            Some(Host::Domain(domain)) => {
                IpAddr::from_str(domain).map_err(|_| invalid("host must be an IP address"))?
            }
            None => return Err(invalid("missing host")),
        };
        let port = url.port().unwrap_or(DEFAULT_PORT);

        Ok(Peer {
            id,
            address: SocketAddr::new(ip, port),
        })
    }
}

impl FromStr for Peer {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Peer::parse(input)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enode://{}@{}", hex::encode(node_id(&self.id)), self.address)
    }
}
