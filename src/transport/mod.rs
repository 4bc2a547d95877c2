//! Peer Transport Module
//!
//! Node-to-node communication for the ring. Every remote operation is a single
//! request/response exchange over a fresh TCP connection:
//!
//! 1. connect (bounded by the call timeout),
//! 2. write one `<OPCODE>[,<args>]` line,
//! 3. read until the peer closes,
//! 4. close.
//!
//! ## Submodules
//! - **`types`**: [`PeerHandle`], the immutable address-derived proxy for a ring member.
//! - **`protocol`**: opcodes, the [`Command`] / [`Reply`] codec and discovery datagrams.
//! - **`peer`**: the typed remote calls issued through a `PeerHandle`.
//! - **`error`**: [`TransportError`]. Protocol logic treats every variant as "peer down".

pub mod error;
pub mod peer;
pub mod protocol;
pub mod types;

pub use error::TransportError;
pub use protocol::{Command, Reply};
pub use types::PeerHandle;
