//! Routed key-value access and shard rebalancing.

use crate::node::ChordNode;
use crate::ring::NodeId;
use crate::storage::shard::KeyShard;
use crate::transport::PeerHandle;
use crate::transport::protocol::is_valid_key;

use anyhow::{Result, bail};
use serde_json::Value;
use tracing::{debug, info, warn};

impl ChordNode {
    /// Position of `key` on the ring.
    pub fn key_id(&self, key: &str) -> NodeId {
        self.space.hash(key)
    }

    /// Stores `value` on the owner of `key`.
    ///
    /// Fire-and-forget: a failed write is logged and otherwise lost. Callers that need to
    /// know should read the key back, or use [`ChordNode::try_store_key`].
    pub async fn store_key(&self, key: &str, value: Value) {
        if let Err(e) = self.try_store_key(key, value).await {
            warn!("store_key({}) from {} was lost: {:#}", key, self.local, e);
        }
    }

    /// Stores `value` on the owner of `key` and returns that owner.
    pub async fn try_store_key(&self, key: &str, value: Value) -> Result<PeerHandle> {
        if !is_valid_key(key) {
            bail!("invalid key {:?}", key);
        }

        let owner = self.find_successor(self.key_id(key)).await?;
        if owner == self.local {
            self.store_local(key.to_string(), value);
        } else {
            owner.store_key(key, &value).await?;
        }

        debug!("Stored {} on {}", key, owner);
        Ok(owner)
    }

    /// Reads `key` from its owner. An absent key and an unreachable owner both give `None`.
    pub async fn retrieve_key(&self, key: &str) -> Option<Value> {
        if !is_valid_key(key) {
            return None;
        }

        let owner = match self.find_successor(self.key_id(key)).await {
            Ok(owner) => owner,
            Err(e) => {
                debug!("No owner found for {}: {:#}", key, e);
                return None;
            }
        };

        if owner == self.local {
            return self.get_local(key);
        }

        match owner.retrieve_key(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!("retrieve_key({}) from {} failed: {}", key, owner, e);
                None
            }
        }
    }

    /// Commits an entry to this node's shard, whoever owns it.
    pub fn store_local(&self, key: String, value: Value) {
        self.state.lock().shard.insert(key, value);
        self.persist();
    }

    pub fn get_local(&self, key: &str) -> Option<Value> {
        self.state.lock().shard.get(key).cloned()
    }

    pub fn shard_snapshot(&self) -> KeyShard {
        self.state.lock().shard.clone()
    }

    /// Pushes every entry owned by another node to that node and drops it locally once
    /// the owner acknowledged. Entries whose owner cannot be resolved or reached stay put
    /// for the next round.
    ///
    /// Returns how many entries moved.
    pub async fn rebalance(&self) -> Result<usize> {
        let snapshot = self.shard_snapshot();
        if snapshot.is_empty() {
            return Ok(0);
        }

        let mut moved = 0;
        for (key, value) in snapshot.iter() {
            let owner = match self.find_successor(self.key_id(key)).await {
                Ok(owner) => owner,
                Err(e) => {
                    debug!("Rebalance could not resolve owner of {}: {:#}", key, e);
                    continue;
                }
            };
            if owner == self.local {
                continue;
            }

            if let Err(e) = owner.store_key(key, value).await {
                debug!("Rebalance push of {} to {} failed: {}", key, owner, e);
                continue;
            }

            if self.state.lock().shard.remove_if_unchanged(key, value) {
                moved += 1;
            }
        }

        if moved > 0 {
            info!("Node {} handed {} entries to their owners", self.local, moved);
            self.persist();
        }
        Ok(moved)
    }
}
