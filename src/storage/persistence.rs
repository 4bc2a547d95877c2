//! Shard Persistence
//!
//! A node can snapshot its shard to disk and reload it on restart. The ring itself never
//! reads these files; they only seed the shard of the node that wrote them.

use super::shard::KeyShard;
use crate::ring::NodeId;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Durable storage for a single node's shard.
pub trait ShardPersistence: Send + Sync {
    fn load(&self) -> Result<KeyShard>;
    fn save(&self, shard: &KeyShard) -> Result<()>;
}

/// Stores the shard as one JSON object in `<dir>/<node_id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>, node_id: NodeId) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;

        Ok(Self {
            path: dir.join(format!("{}.json", node_id)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ShardPersistence for JsonFileStore {
    fn load(&self) -> Result<KeyShard> {
        if !self.path.is_file() {
            return Ok(KeyShard::new());
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let shard = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;

        Ok(shard)
    }

    fn save(&self, shard: &KeyShard) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let encoded = serde_json::to_vec_pretty(shard)?;

        fs::write(&tmp, encoded).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;

        Ok(())
    }
}
