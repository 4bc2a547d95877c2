//! Ring Arithmetic Module
//!
//! Maps node addresses and application keys onto the same m-bit circular identifier
//! space and answers the ordering questions every other layer asks about it.
//!
//! ## Core Concepts
//! - **Identifier space**: `[0, 2^m)`, with `m` fixed ring-wide by configuration.
//! - **Arc membership**: `(start, end]` walking clockwise. Ownership of a key belongs to the
//!   first node at or after it, so every boundary decision goes through [`in_arc`].

pub mod arith;

pub use arith::{MAX_BITS, NodeId, RingSpace, in_arc, in_open_arc};
