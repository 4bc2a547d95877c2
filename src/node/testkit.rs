//! Helpers for tests that need live nodes on loopback.

use super::service::ChordNode;
use crate::app::registry::JobRegistry;
use crate::config::RingConfig;
use crate::ring::{NodeId, RingSpace};

use std::sync::Arc;
use tokio::task::JoinHandle;

/// A node whose dispatcher is running. Background protocols are not started; tests drive
/// them one round at a time.
pub struct TestNode {
    pub node: Arc<ChordNode>,
    server: JoinHandle<()>,
}

impl TestNode {
    /// Stops the dispatcher and drops the node, which closes its listener. Calls to it are
    /// refused from then on.
    pub async fn kill(self) {
        self.server.abort();
        let _ = self.server.await;
        drop(self.node);
    }
}

impl std::ops::Deref for TestNode {
    type Target = Arc<ChordNode>;

    fn deref(&self) -> &Self::Target {
        &self.node
    }
}

/// Loopback, ephemeral port, pinned id, no broadcasts.
pub fn test_config(id: NodeId, bits: u32) -> RingConfig {
    let mut config = RingConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        bits,
        node_id: Some(id),
        ..RingConfig::default()
    };
    config.discovery.enabled = false;
    config.summary.enabled = false;
    config
}

pub async fn spawn_node(id: NodeId, bits: u32) -> TestNode {
    spawn_with(test_config(id, bits), JobRegistry::new()).await
}

pub async fn spawn_with(config: RingConfig, jobs: Arc<JobRegistry>) -> TestNode {
    let node = ChordNode::with_jobs(config, jobs).await.unwrap();
    let server = tokio::spawn(node.clone().serve());
    TestNode { node, server }
}

/// Builds a ring from `ids`: the first node is the seed, the rest join through it, then a
/// few maintenance rounds let pointers converge.
pub async fn spawn_ring(ids: &[NodeId], bits: u32) -> Vec<TestNode> {
    let mut nodes = Vec::new();
    for &id in ids {
        nodes.push(spawn_node(id, bits).await);
    }
    for joiner in &nodes[1..] {
        joiner.join(&nodes[0].local).await.unwrap();
    }
    settle(&nodes, 3).await;
    nodes
}

/// Runs stabilization, finger fixing and predecessor checks on every node, `rounds` times.
pub async fn settle(nodes: &[TestNode], rounds: usize) {
    for _ in 0..rounds {
        for node in nodes {
            let _ = node.stabilize().await;
        }
        for node in nodes {
            let _ = node.fix_all_fingers().await;
            let _ = node.check_predecessor().await;
        }
    }
}

/// A key whose ring position is exactly `target`.
pub fn key_hashing_to(space: &RingSpace, target: NodeId) -> String {
    (0u64..)
        .map(|i| format!("key-{}", i))
        .find(|key| space.hash(key) == target)
        .unwrap()
}
