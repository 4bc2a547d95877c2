//! Chord Ring Library
//!
//! A self-organizing peer-to-peer ring that partitions a key-value store over its members
//! by consistent hashing. The binary (`main.rs`) runs one member per process.
//!
//! ## Architecture Modules
//!
//! - **`ring`**: identifier space arithmetic. Hashing, modular intervals, finger starts.
//! - **`transport`**: the line-based TCP wire protocol and the typed remote calls made
//!   through a `PeerHandle`.
//! - **`node`**: the local member. Owns the ring state, answers peer requests and runs the
//!   background protocols (discovery, stabilization, finger fixing, predecessor liveness,
//!   replica pulling, rebalancing).
//! - **`storage`**: the local shard, routed store/retrieve, rebalancing and the optional
//!   on-disk snapshot.
//! - **`app`**: the application layer on top: typed client, job handlers and the summary
//!   broadcast channel.
//! - **`config`**: node configuration with defaults for every field.

pub mod app;
pub mod config;
pub mod node;
pub mod ring;
pub mod storage;
pub mod transport;
