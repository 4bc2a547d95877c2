use crate::ring::{NodeId, RingSpace, in_open_arc};
use crate::storage::shard::KeyShard;
use crate::transport::PeerHandle;
use serde::Serialize;

/// Depth of the predecessor chain: the primary plus two backups.
pub const CHAIN_DEPTH: usize = 3;

/// A snapshot of one predecessor's shard, tagged with the peer it was pulled from.
#[derive(Debug, Clone)]
pub struct Replica {
    pub source: PeerHandle,
    pub data: KeyShard,
}

/// Non-authoritative copies of predecessor shards, at most one per source peer.
///
/// Written by replica pulling. A snapshot is only ever absorbed when its own source is
/// declared dead, never on behalf of whichever peer happens to sit in a chain slot.
#[derive(Debug, Clone, Default)]
pub struct ReplicaCache {
    replicas: Vec<Replica>,
}

impl ReplicaCache {
    /// Keeps `data` as the latest snapshot of `source`, replacing any older one.
    pub fn record(&mut self, source: PeerHandle, data: KeyShard) {
        match self.replicas.iter_mut().find(|replica| replica.source == source) {
            Some(replica) => replica.data = data,
            None => self.replicas.push(Replica { source, data }),
        }
    }

    /// Removes and returns the snapshot pulled from `source`.
    pub fn take(&mut self, source: &PeerHandle) -> Option<KeyShard> {
        let index = self
            .replicas
            .iter()
            .position(|replica| replica.source == *source)?;
        Some(self.replicas.swap_remove(index).data)
    }

    pub fn get(&self, source: &PeerHandle) -> Option<&KeyShard> {
        self.replicas
            .iter()
            .find(|replica| replica.source == *source)
            .map(|replica| &replica.data)
    }

    /// Drops snapshots of peers that left the predecessor chain.
    pub fn retain_sources(&mut self, chain: &[Option<PeerHandle>]) {
        self.replicas
            .retain(|replica| chain.iter().flatten().any(|peer| *peer == replica.source));
    }

    pub fn sources(&self) -> Vec<PeerHandle> {
        self.replicas.iter().map(|replica| replica.source.clone()).collect()
    }

    /// Total entries across every snapshot.
    pub fn entry_count(&self) -> usize {
        self.replicas.iter().map(|replica| replica.data.len()).sum()
    }
}

/// Everything one node knows about the ring, plus the data it holds.
///
/// Lives behind the node's single mutex. Methods here are pure bookkeeping; anything that
/// needs the network happens in the node with the lock released.
#[derive(Debug)]
pub struct RingState {
    pub successor: PeerHandle,
    /// `[primary, backup, backup2]`, nearest first. Never contains the local node and
    /// never has a gap before a filled slot.
    pub predecessors: [Option<PeerHandle>; CHAIN_DEPTH],
    /// `fingers[i]` approximates the successor of `(id + 2^i) mod 2^m`.
    pub fingers: Vec<PeerHandle>,
    pub next_finger: usize,
    pub shard: KeyShard,
    pub replicas: ReplicaCache,
}

impl RingState {
    /// A one-member ring: every pointer refers back to `local`.
    pub fn singleton(local: &PeerHandle, space: &RingSpace) -> Self {
        Self {
            successor: local.clone(),
            predecessors: Default::default(),
            fingers: vec![local.clone(); space.bits() as usize],
            next_finger: 0,
            shard: KeyShard::new(),
            replicas: ReplicaCache::default(),
        }
    }

    /// Drops every ring pointer. Shard and replica cache survive.
    pub fn reset(&mut self, local: &PeerHandle) {
        self.successor = local.clone();
        self.predecessors = Default::default();
        self.fingers.iter_mut().for_each(|finger| *finger = local.clone());
        self.next_finger = 0;
    }

    pub fn predecessor(&self) -> Option<&PeerHandle> {
        self.predecessors[0].as_ref()
    }

    pub fn is_singleton(&self, local: &PeerHandle) -> bool {
        self.successor == *local && self.predecessors[0].is_none()
    }

    pub fn set_successor(&mut self, successor: PeerHandle) {
        if let Some(first) = self.fingers.first_mut() {
            *first = successor.clone();
        }
        self.successor = successor;
    }

    /// Makes `peer` the primary predecessor, shifting the previous chain back one slot.
    pub fn push_predecessor(&mut self, local: &PeerHandle, peer: PeerHandle) {
        if peer == *local || self.predecessors[0].as_ref() == Some(&peer) {
            return;
        }
        let previous = std::mem::take(&mut self.predecessors);
        let chain = std::iter::once(peer).chain(previous.into_iter().flatten());
        self.predecessors = compact_chain(local, chain);
    }

    pub fn clear_predecessor(&mut self) {
        self.predecessors = Default::default();
    }

    /// Removes every peer in `dead` from the chain by identity and closes the gaps, so a
    /// predecessor pushed in concurrently keeps its place. Returns the new primary.
    pub fn remove_predecessors(
        &mut self,
        local: &PeerHandle,
        dead: &[PeerHandle],
    ) -> Option<PeerHandle> {
        let previous = std::mem::take(&mut self.predecessors);
        let survivors = previous.into_iter().flatten().filter(|peer| !dead.contains(peer));
        self.predecessors = compact_chain(local, survivors);
        self.predecessors[0].clone()
    }

    /// Replaces the backups behind `primary`. Ignored if the primary changed meanwhile.
    pub fn set_backups(
        &mut self,
        local: &PeerHandle,
        primary: &PeerHandle,
        backup: Option<PeerHandle>,
        backup2: Option<PeerHandle>,
    ) {
        if self.predecessors[0].as_ref() != Some(primary) {
            return;
        }
        let chain = [Some(primary.clone()), backup, backup2];
        self.predecessors = compact_chain(local, chain.into_iter().flatten());
    }

    /// Replaces every finger pointing at `dead` with the local node.
    pub fn forget_peer(&mut self, local: &PeerHandle, dead: &PeerHandle) {
        for finger in self.fingers.iter_mut().filter(|finger| finger.id == dead.id) {
            *finger = local.clone();
        }
    }

    /// Farthest finger strictly inside `(local, target)`, or `local` if there is none.
    pub fn closest_preceding_finger(&self, local: &PeerHandle, target: NodeId) -> PeerHandle {
        self.fingers
            .iter()
            .rev()
            .find(|finger| in_open_arc(finger.id, local.id, target))
            .cloned()
            .unwrap_or_else(|| local.clone())
    }

    /// Distinct live candidates to fall back on when the successor dies, nearest
    /// clockwise first: fingers in table order, then the predecessor chain farthest first.
    pub fn successor_candidates(&self, local: &PeerHandle, dead: &PeerHandle) -> Vec<PeerHandle> {
        let mut candidates: Vec<PeerHandle> = Vec::new();
        let predecessors = self.predecessors.iter().rev().flatten();
        for peer in self.fingers.iter().chain(predecessors) {
            if peer != local && peer != dead && !candidates.contains(peer) {
                candidates.push(peer.clone());
            }
        }
        candidates
    }

    pub fn status(&self, local: &PeerHandle) -> NodeStatus {
        let mut distinct_fingers: Vec<NodeId> = self.fingers.iter().map(|f| f.id).collect();
        distinct_fingers.sort_unstable();
        distinct_fingers.dedup();

        NodeStatus {
            node: local.clone(),
            successor: self.successor.clone(),
            predecessors: self.predecessors.iter().flatten().cloned().collect(),
            distinct_fingers: distinct_fingers.len(),
            shard_entries: self.shard.len(),
            replica_entries: self.replicas.entry_count(),
        }
    }
}

fn compact_chain(
    local: &PeerHandle,
    peers: impl IntoIterator<Item = PeerHandle>,
) -> [Option<PeerHandle>; CHAIN_DEPTH] {
    let mut chain: [Option<PeerHandle>; CHAIN_DEPTH] = Default::default();
    let mut filled = 0;
    for peer in peers {
        if filled == CHAIN_DEPTH {
            break;
        }
        if peer == *local || chain[..filled].iter().flatten().any(|p| *p == peer) {
            continue;
        }
        chain[filled] = Some(peer);
        filled += 1;
    }
    chain
}

/// Point-in-time view of a node, for logs and operators.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node: PeerHandle,
    pub successor: PeerHandle,
    pub predecessors: Vec<PeerHandle>,
    pub distinct_fingers: usize,
    pub shard_entries: usize,
    pub replica_entries: usize,
}
