//! Application Layer
//!
//! A thin layer on top of the ring for the external UI and simulation clients. The ring
//! treats every record as opaque JSON; everything that gives records meaning lives here.
//!
//! ## Components
//! - **Client**: [`client::RingClient`], typed `send` / `get` plus the job trigger.
//! - **Jobs**: named handlers ([`registry::JobRegistry`]) run on the node that received
//!   `SUBMIT_JOB`; their output is written back through the ring.
//! - **Summaries**: the node holding the largest id periodically broadcasts the records of
//!   the whole ring; every listener keeps a deduplicated [`summary::SummaryBoard`].

pub mod client;
pub mod jobs;
pub mod registry;
pub mod summary;
pub mod types;

#[cfg(test)]
mod tests;
