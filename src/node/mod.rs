//! Local Node Core
//!
//! One [`ChordNode`] per process. It owns the ring state of the local member and keeps it
//! converging through independently scheduled protocols:
//!
//! - **Discovery**: broadcast `JOIN` on startup and after a reset; splice announced nodes
//!   in as predecessor or successor when they fit.
//! - **Stabilization**: adopt the successor's predecessor when it sits between us, then
//!   notify the successor.
//! - **Finger fixing**: refresh one finger table entry per tick.
//! - **Predecessor liveness**: ping the predecessor; on failure absorb its cached shard
//!   and promote the next member of the predecessor chain.
//! - **Replica pulling**: snapshot the two nearest predecessors' shards.
//! - **Rebalancing**: push entries this node no longer owns to their owner.
//!
//! Incoming peer requests are served by the dispatcher, one connection per request.
//!
//! ## Consistency
//! Ring state sits behind a single mutex that is never held across a remote call. There is
//! no cross-node coordination: pointers are allowed to be wrong for a while and every
//! protocol re-evaluates them on its next tick.

pub mod dispatcher;
pub mod protocols;
pub mod service;
pub mod state;

pub use service::ChordNode;
pub use state::{NodeStatus, RingState};


#[cfg(test)]
pub(crate) mod testkit;
