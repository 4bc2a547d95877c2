use crate::ring::{NodeId, RingSpace};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};

/// Proxy for a ring member, local or remote.
///
/// Identity is the ring id: two handles are equal when their ids are equal, whatever
/// address they carry. A handle holds no live state; every question about the member is
/// a fresh remote call (see `transport::peer`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerHandle {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl PeerHandle {
    /// Derives the id from the address, the normal way a member enters the ring.
    pub fn from_addr(addr: SocketAddr, space: &RingSpace) -> Self {
        Self {
            id: space.hash(&addr.to_string()),
            addr,
        }
    }

    pub fn with_id(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }

    /// Wire form `<id>,<ip>,<port>`.
    pub fn encode(&self) -> String {
        format!("{},{},{}", self.id, self.addr.ip(), self.addr.port())
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().splitn(3, ',');
        let id: NodeId = parts.next()?.parse().ok()?;
        let ip: IpAddr = parts.next()?.parse().ok()?;
        let port: u16 = parts.next()?.parse().ok()?;
        Some(Self {
            id,
            addr: SocketAddr::new(ip, port),
        })
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerHandle {}

impl Hash for PeerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}
