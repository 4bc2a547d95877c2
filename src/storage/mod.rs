//! Key-Value Storage Module
//!
//! The key space is partitioned over the ring by consistent hashing: a key belongs to the
//! node whose id is the ring-successor of `hash(key)`.
//!
//! ## Core Concepts
//! - **Shard**: the entries a node currently holds ([`shard::KeyShard`]).
//! - **Routed access**: `store_key` / `retrieve_key` resolve the owner through the ring and
//!   talk to it directly. There is no local fallback and no retry.
//! - **Rebalancing**: entries stranded on the wrong node after a membership change are
//!   pushed to their owner on the next rebalance tick.
//! - **Persistence**: an optional JSON snapshot of the shard on disk.

pub mod persistence;
pub mod shard;
pub mod store;
