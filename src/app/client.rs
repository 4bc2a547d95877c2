use super::types::{JobId, RecordSummary};
use crate::node::ChordNode;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Typed front door used by the UI and simulation clients.
///
/// Records are stored as JSON; `send` and `get` do the (de)serialization and route through
/// the node they wrap.
#[derive(Clone)]
pub struct RingClient {
    node: Arc<ChordNode>,
}

impl RingClient {
    pub fn new(node: Arc<ChordNode>) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &Arc<ChordNode> {
        &self.node
    }

    /// Stores `record` under `key` on its owner.
    pub async fn send<T: Serialize>(&self, key: &str, record: &T) -> Result<()> {
        let value = serde_json::to_value(record).context("encoding record")?;
        self.node.try_store_key(key, value).await?;
        Ok(())
    }

    /// `Ok(None)` when the key is absent or its owner is unreachable.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.node.retrieve_key(key).await {
            Some(value) => {
                let record = serde_json::from_value(value)
                    .with_context(|| format!("decoding record {}", key))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Asks the owner of `key` to run `handler` against the record. The result lands back
    /// under the same key once the job finishes.
    pub async fn trigger(&self, handler: &str, key: &str) -> Result<JobId> {
        let owner = self.node.find_successor(self.node.key_id(key)).await?;

        let job_id = if owner == self.node.local {
            self.node.accept_job(handler, key)
        } else {
            owner.submit_job(handler, key).await?
        };

        job_id.ok_or_else(|| anyhow!("{} declined job '{}' for {}", owner, handler, key))
    }

    /// Records of the whole ring, one per key.
    pub async fn summaries(&self) -> Result<Vec<RecordSummary>> {
        self.node.collect_ring_summaries().await
    }
}
