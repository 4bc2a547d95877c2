use super::state::{CHAIN_DEPTH, NodeStatus, RingState};
use crate::app::registry::JobRegistry;
use crate::app::summary::SummaryBoard;
use crate::config::RingConfig;
use crate::ring::{NodeId, RingSpace, in_arc, in_open_arc};
use crate::storage::persistence::{JsonFileStore, ShardPersistence};
use crate::transport::PeerHandle;

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Upper bound on hops for a single lookup. Stale fingers degrade lookups towards a linear
/// walk, which still terminates well below this on any ring this node will see.
pub const MAX_LOOKUP_HOPS: usize = 256;

pub struct ChordNode {
    pub local: PeerHandle,
    pub(crate) space: RingSpace,
    pub(crate) config: RingConfig,
    pub(crate) state: Mutex<RingState>,
    pub(crate) listener: TcpListener,
    pub(crate) jobs: Arc<JobRegistry>,
    pub(crate) summaries: Arc<SummaryBoard>,
    persistence: Option<Arc<dyn ShardPersistence>>,
    /// Generation of the latest shard snapshot handed to a writer.
    snapshot_generation: AtomicU64,
    /// Generation of the snapshot currently on disk.
    persisted_generation: Arc<Mutex<u64>>,
}

impl ChordNode {
    pub async fn new(config: RingConfig) -> Result<Arc<Self>> {
        Self::with_jobs(config, JobRegistry::new()).await
    }

    /// Binds the command listener and builds a singleton ring around it.
    ///
    /// Background protocols do not run until [`ChordNode::start`].
    pub async fn with_jobs(config: RingConfig, jobs: Arc<JobRegistry>) -> Result<Arc<Self>> {
        config.validate()?;
        let space = RingSpace::new(config.bits)?;

        let listener = TcpListener::bind(config.bind)
            .await
            .with_context(|| format!("binding command listener on {}", config.bind))?;
        let addr = config.advertised_addr(listener.local_addr()?)?;

        let local = match config.node_id {
            Some(id) => PeerHandle::with_id(id, addr),
            None => PeerHandle::from_addr(addr, &space),
        };

        let persistence: Option<Arc<dyn ShardPersistence>> = match &config.data_dir {
            Some(dir) => Some(Arc::new(JsonFileStore::new(dir, local.id)?)),
            None => None,
        };

        let mut state = RingState::singleton(&local, &space);
        if let Some(store) = &persistence {
            state.shard = store.load()?;
            info!("Loaded {} entries from disk", state.shard.len());
        }

        info!("Node {} created on a {}-bit ring", local, space.bits());

        Ok(Arc::new(Self {
            local,
            space,
            config,
            state: Mutex::new(state),
            listener,
            jobs,
            summaries: Arc::new(SummaryBoard::new()),
            persistence,
            snapshot_generation: AtomicU64::new(0),
            persisted_generation: Arc::new(Mutex::new(0)),
        }))
    }

    pub fn space(&self) -> RingSpace {
        self.space
    }

    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    pub fn jobs(&self) -> Arc<JobRegistry> {
        self.jobs.clone()
    }

    pub fn summary_board(&self) -> Arc<SummaryBoard> {
        self.summaries.clone()
    }

    // --- State accessors. Each takes the lock for one short critical section. ---

    pub fn successor(&self) -> PeerHandle {
        self.state.lock().successor.clone()
    }

    pub fn predecessor(&self) -> Option<PeerHandle> {
        self.state.lock().predecessor().cloned()
    }

    pub fn predecessor_chain(&self) -> [Option<PeerHandle>; CHAIN_DEPTH] {
        self.state.lock().predecessors.clone()
    }

    pub fn fingers(&self) -> Vec<PeerHandle> {
        self.state.lock().fingers.clone()
    }

    pub fn status(&self) -> NodeStatus {
        self.state.lock().status(&self.local)
    }

    pub fn update_successor(&self, successor: PeerHandle) {
        let mut state = self.state.lock();
        if state.successor != successor {
            info!("Successor of {} updated to {}", self.local, successor);
            state.set_successor(successor);
        }
    }

    pub fn update_predecessor(&self, predecessor: PeerHandle) {
        let mut state = self.state.lock();
        if state.predecessor() != Some(&predecessor) {
            info!("Predecessor of {} updated to {}", self.local, predecessor);
            state.push_predecessor(&self.local, predecessor);
        }
    }

    /// Advisory only: true when this node holds the largest id on the ring, judged from
    /// its own successor pointer. Nothing in ring maintenance depends on it.
    pub fn is_ring_maximum(&self) -> bool {
        self.successor().id <= self.local.id
    }

    pub(crate) fn reset_to_singleton(&self) {
        warn!("Node {} resetting to a singleton ring", self.local);
        self.state.lock().reset(&self.local);
    }

    pub(crate) fn forget_peer(&self, dead: &PeerHandle) {
        self.state.lock().forget_peer(&self.local, dead);
    }

    // --- Routing ---

    pub fn closest_preceding_finger(&self, id: NodeId) -> PeerHandle {
        self.state.lock().closest_preceding_finger(&self.local, id)
    }

    pub async fn find_predecessor(&self, id: NodeId) -> Result<PeerHandle> {
        let (predecessor, _) = self.locate(id).await?;
        Ok(predecessor)
    }

    pub async fn find_successor(&self, id: NodeId) -> Result<PeerHandle> {
        let (_, successor) = self.locate(id).await?;
        Ok(successor)
    }

    /// Walks the ring towards `id` and returns the node whose arc `(node, successor]`
    /// contains it, together with that successor.
    ///
    /// Each hop jumps to the closest preceding finger of the current node. When a node has
    /// no finger closer than itself the walk steps to its successor instead, so progress is
    /// guaranteed even with empty finger tables.
    async fn locate(&self, id: NodeId) -> Result<(PeerHandle, PeerHandle)> {
        let mut current = self.local.clone();
        let mut current_successor = self.successor();

        for _ in 0..MAX_LOOKUP_HOPS {
            if in_arc(id, current.id, current_successor.id) {
                return Ok((current, current_successor));
            }

            let next = if current == self.local {
                self.closest_preceding_finger(id)
            } else {
                current.closest_preceding_finger(id).await?
            };
            let next = if next == current {
                current_successor.clone()
            } else {
                next
            };

            current_successor = if next == self.local {
                self.successor()
            } else {
                match next.successor().await {
                    Ok(successor) => successor,
                    Err(e) => {
                        if current == self.local {
                            self.forget_peer(&next);
                        }
                        return Err(e.into());
                    }
                }
            };
            current = next;
        }

        bail!("lookup of {} did not converge within {} hops", id, MAX_LOOKUP_HOPS)
    }

    // --- Membership ---

    /// Enters the ring through `seed`: adopt the seed's answer for our own successor and
    /// let stabilization do the rest.
    pub async fn join(&self, seed: &PeerHandle) -> Result<()> {
        let successor = seed
            .find_successor(self.local.id)
            .await
            .with_context(|| format!("asking seed {} for our successor", seed))?;

        {
            let mut state = self.state.lock();
            state.clear_predecessor();
            state.set_successor(successor.clone());
        }
        info!("Node {} joined via {}: successor is {}", self.local, seed, successor);

        if successor != self.local {
            successor.notify(&self.local).await?;
        }
        Ok(())
    }

    /// `peer` believes it might be our predecessor.
    pub fn notify(&self, peer: PeerHandle) {
        if peer == self.local {
            return;
        }

        let mut state = self.state.lock();
        let adopt = match state.predecessor() {
            None => true,
            Some(current) => in_open_arc(peer.id, current.id, self.local.id),
        };

        if adopt {
            info!("Node {} adopting {} as predecessor", self.local, peer);
            state.push_predecessor(&self.local, peer);
        }
    }

    /// Splices an announced node in as predecessor and/or successor when it falls inside
    /// the corresponding arc, and tells it about us.
    pub async fn handle_join(&self, peer: PeerHandle) -> Result<()> {
        if peer == self.local {
            return Ok(());
        }
        debug!("Node {} handling JOIN from {}", self.local, peer);

        let (as_predecessor, as_successor) = {
            let mut state = self.state.lock();

            if state.is_singleton(&self.local) {
                state.push_predecessor(&self.local, peer.clone());
                state.set_successor(peer.clone());
                (true, true)
            } else {
                let as_predecessor = match state.predecessor() {
                    None => true,
                    Some(current) => in_open_arc(peer.id, current.id, self.local.id),
                };
                let as_successor = in_arc(peer.id, self.local.id, state.successor.id);

                if as_predecessor {
                    state.push_predecessor(&self.local, peer.clone());
                }
                if as_successor {
                    state.set_successor(peer.clone());
                }
                (as_predecessor, as_successor)
            }
        };

        if as_predecessor {
            info!("Node {} spliced in {} as predecessor", self.local, peer);
            peer.update_successor(&self.local).await?;
        }
        if as_successor {
            info!("Node {} spliced in {} as successor", self.local, peer);
            peer.update_predecessor(&self.local).await?;
        }
        Ok(())
    }

    // --- Persistence ---

    /// Schedules a write of the current shard when persistence is configured. The file is
    /// rewritten on the blocking pool; a snapshot older than the one on disk is skipped, so
    /// out-of-order writers never roll the file back.
    pub(crate) fn persist(&self) {
        let Some(write) = self.snapshot_writer() else {
            return;
        };

        let local = self.local.clone();
        let write = move || {
            if let Err(e) = write() {
                tracing::error!("Failed to persist shard of {}: {:#}", local, e);
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(write);
            }
            Err(_) => write(),
        }
    }

    /// Writes the current shard and waits for it to reach disk.
    pub async fn flush_shard(&self) -> Result<()> {
        match self.snapshot_writer() {
            Some(write) => tokio::task::spawn_blocking(write).await?,
            None => Ok(()),
        }
    }

    fn snapshot_writer(&self) -> Option<impl FnOnce() -> Result<()> + Send + 'static> {
        let store = self.persistence.clone()?;
        let persisted = self.persisted_generation.clone();

        let (generation, snapshot) = {
            let state = self.state.lock();
            let generation = self.snapshot_generation.fetch_add(1, Ordering::Relaxed) + 1;
            (generation, state.shard.clone())
        };

        Some(move || {
            let mut on_disk = persisted.lock();
            if *on_disk >= generation {
                return Ok(());
            }
            store.save(&snapshot)?;
            *on_disk = generation;
            Ok(())
        })
    }
}
