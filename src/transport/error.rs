use std::net::SocketAddr;
use thiserror::Error;

/// Outcome of a failed remote call.
///
/// The variants exist for logging; callers in the ring protocols collapse all of them
/// into "the peer is down" and retry on their next tick.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {addr} unreachable: {source}")]
    Unreachable {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("peer {addr} timed out")]
    Timeout { addr: SocketAddr },

    #[error("malformed response from {addr}: {reason}")]
    Malformed { addr: SocketAddr, reason: String },
}

impl TransportError {
    pub fn addr(&self) -> SocketAddr {
        match self {
            TransportError::Unreachable { addr, .. }
            | TransportError::Timeout { addr }
            | TransportError::Malformed { addr, .. } => *addr,
        }
    }
}
