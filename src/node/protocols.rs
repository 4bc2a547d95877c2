//! Background protocols of a ring member.
//!
//! Every protocol is a plain async method that performs one round and can be called
//! directly (tests do), plus a driver that repeats it on its own interval. A failed round
//! is logged and the driver waits for the next tick.

use super::service::ChordNode;
use crate::ring::in_open_arc;
use crate::transport::PeerHandle;
use crate::transport::protocol::{decode_join, encode_join};

use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

impl ChordNode {
    /// Spawns the command dispatcher and every background protocol, then enters the ring
    /// through the configured seed and/or a discovery broadcast. Returns once bootstrapping
    /// is done; the tasks keep running for the life of the process.
    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting ring node {}...", self.local);

        let _dispatcher_handle = {
            let node = self.clone();
            tokio::spawn(async move {
                node.serve().await;
            })
        };

        if self.config.discovery.enabled {
            let node = self.clone();
            tokio::spawn(async move {
                node.discovery_loop().await;
            });
        }

        let intervals = self.config.intervals.clone();

        self.spawn_periodic("stabilize", intervals.stabilize(), |node| async move {
            node.stabilize().await
        });
        self.spawn_periodic("fix_fingers", intervals.fix_fingers(), |node| async move {
            node.fix_next_finger().await
        });
        self.spawn_periodic(
            "check_predecessor",
            intervals.check_predecessor(),
            |node| async move { node.check_predecessor().await },
        );
        self.spawn_periodic("pull_replicas", intervals.replicate(), |node| async move {
            node.pull_replicas().await
        });
        self.spawn_periodic("rebalance", intervals.rebalance(), |node| async move {
            node.rebalance().await.map(|_| ())
        });

        if self.config.summary.enabled {
            self.start_summary_channel();
        }

        tracing::info!("All background tasks started");

        self.bootstrap().await;
    }

    async fn bootstrap(&self) {
        if let Some(seed_addr) = self.config.seed {
            let seed = PeerHandle::from_addr(seed_addr, &self.space);
            if seed.addr != self.local.addr
                && let Err(e) = self.join(&seed).await
            {
                warn!("Join through seed {} failed: {:#}", seed_addr, e);
            }
        }

        if let Err(e) = self.announce().await {
            warn!("Discovery announcement failed: {:#}", e);
        }
    }

    pub(crate) fn spawn_periodic<F, Fut>(
        self: &Arc<Self>,
        name: &'static str,
        period: Duration,
        step: F,
    )
    where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let node = self.clone();
        tokio::spawn(async move {
            // Spread the first tick so nodes started together do not probe in lockstep.
            let jitter_ms = rand::thread_rng().gen_range(0..=period.as_millis() as u64 / 4);
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if let Err(e) = step(node.clone()).await {
                    warn!("{} round on {} failed: {:#}", name, node.local, e);
                }
            }
        });
    }

    // --- Discovery ---

    /// Broadcasts `JOIN,<id>,<ip>,<port>` on the discovery port.
    pub async fn announce(&self) -> Result<()> {
        let discovery = &self.config.discovery;
        if !discovery.enabled {
            return Ok(());
        }

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;

        let message = encode_join(&self.local);
        socket
            .send_to(message.as_bytes(), (discovery.broadcast_addr, discovery.port))
            .await?;

        info!("Sent JOIN broadcast for {}", self.local);
        Ok(())
    }

    pub(crate) async fn discovery_loop(self: Arc<Self>) {
        let port = self.config.discovery.port;
        let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!("Cannot listen for discovery on port {}: {}", port, e);
                return;
            }
        };
        info!("Listening for discovery broadcasts on port {}", port);

        let mut buf = vec![0u8; 1024];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    let Some(peer) = std::str::from_utf8(&buf[..len]).ok().and_then(decode_join)
                    else {
                        debug!("Ignoring malformed discovery datagram from {}", src);
                        continue;
                    };

                    if let Err(e) = self.handle_join(peer).await {
                        warn!("Error handling JOIN from {}: {:#}", src, e);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to receive discovery datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    // --- Stabilization ---

    /// One stabilization round: adopt the successor's predecessor if it sits strictly
    /// between us and the successor, then notify whichever node is now our successor.
    pub async fn stabilize(&self) -> Result<()> {
        let successor = self.successor();

        let candidate = if successor == self.local {
            self.predecessor()
        } else {
            match successor.predecessor().await {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!("Successor {} of {} unreachable: {}", successor, self.local, e);
                    self.replace_dead_successor(&successor).await;
                    return Ok(());
                }
            }
        };

        let mut next = successor.clone();
        if let Some(candidate) = candidate
            && candidate != self.local
            && in_open_arc(candidate.id, self.local.id, successor.id)
        {
            next = candidate;
        }

        if next != successor {
            self.update_successor(next.clone());
        }
        if next != self.local {
            next.notify(&self.local).await?;
        }

        Ok(())
    }

    /// Falls back to the first reachable finger or chain member, or to a singleton ring
    /// if nobody answers.
    async fn replace_dead_successor(&self, dead: &PeerHandle) {
        self.forget_peer(dead);

        let candidates = self.state.lock().successor_candidates(&self.local, dead);
        for candidate in candidates {
            if candidate.check().await.is_ok() {
                info!("Node {} falling back to successor {}", self.local, candidate);
                self.update_successor(candidate);
                return;
            }
            self.forget_peer(&candidate);
        }

        warn!("Node {} found no live successor", self.local);
        self.update_successor(self.local.clone());
    }

    // --- Finger fixing ---

    /// Recomputes the finger under the round-robin cursor and advances it.
    pub async fn fix_next_finger(&self) -> Result<()> {
        let index = {
            let mut state = self.state.lock();
            let index = state.next_finger % state.fingers.len();
            state.next_finger = (index + 1) % state.fingers.len();
            index
        };

        let start = self.space.finger_start(self.local.id, index as u32);
        let owner = self.find_successor(start).await?;

        let mut state = self.state.lock();
        if state.fingers[index] != owner {
            debug!("Finger {} of {} -> {}", index, self.local, owner);
            state.fingers[index] = owner;
        }
        Ok(())
    }

    /// Refreshes the whole finger table in one go.
    pub async fn fix_all_fingers(&self) -> Result<()> {
        for _ in 0..self.space.bits() {
            self.fix_next_finger().await?;
        }
        Ok(())
    }

    // --- Predecessor liveness & failover ---

    /// Pings the predecessor. While it answers, refreshes the backups behind it; when it
    /// does not, absorbs its replica and promotes the next live member of the chain. An
    /// exhausted chain resets the node to a singleton ring and re-announces it.
    pub async fn check_predecessor(&self) -> Result<()> {
        let [primary, backup, backup2] = self.predecessor_chain();
        let Some(primary) = primary else {
            return Ok(());
        };

        if primary.check().await.is_ok() {
            self.refresh_backups(&primary).await;
            return Ok(());
        }

        warn!("Predecessor {} of {} is not responding", primary, self.local);
        self.absorb_replica(&primary);
        self.forget_peer(&primary);
        let mut dead = vec![primary];

        for candidate in [backup, backup2].into_iter().flatten() {
            if candidate.check().await.is_ok()
                && candidate.update_successor(&self.local).await.is_ok()
            {
                let promoted = self.state.lock().remove_predecessors(&self.local, &dead);
                info!(
                    "Node {} promoted {} to predecessor",
                    self.local,
                    promoted.as_ref().unwrap_or(&candidate)
                );
                return Ok(());
            }

            warn!("Backup predecessor {} of {} is down too", candidate, self.local);
            self.absorb_replica(&candidate);
            self.forget_peer(&candidate);
            dead.push(candidate);
        }

        self.reset_to_singleton();
        self.rejoin().await
    }

    /// Re-enters the ring after a reset.
    async fn rejoin(&self) -> Result<()> {
        if let Some(seed_addr) = self.config.seed {
            let seed = PeerHandle::from_addr(seed_addr, &self.space);
            if seed.addr != self.local.addr
                && let Err(e) = self.join(&seed).await
            {
                warn!("Rejoin through seed {} failed: {:#}", seed_addr, e);
            }
        }
        self.announce().await
    }

    async fn refresh_backups(&self, primary: &PeerHandle) {
        let backup = match primary.predecessor().await {
            Ok(backup) => backup.filter(|peer| *peer != self.local && peer != primary),
            Err(_) => None,
        };

        let backup2 = match &backup {
            Some(backup) => match backup.predecessor().await {
                Ok(candidate) => candidate
                    .filter(|peer| *peer != self.local && peer != primary && peer != backup),
                Err(_) => None,
            },
            None => None,
        };

        self.state
            .lock()
            .set_backups(&self.local, primary, backup, backup2);
    }

    /// Merges the snapshot pulled from `dead` into the shard. Snapshots of other peers stay
    /// cached: they are only copies of nodes that are still alive.
    fn absorb_replica(&self, dead: &PeerHandle) {
        let absorbed = {
            let mut state = self.state.lock();
            let replica = state.replicas.take(dead);
            replica.map(|data| state.shard.absorb(data))
        };

        match absorbed {
            Some(absorbed) if absorbed > 0 => {
                info!(
                    "Node {} absorbed {} entries replicated from {}",
                    self.local, absorbed, dead
                );
                self.persist();
            }
            Some(_) => {}
            None => debug!("Node {} holds no replica of {}", self.local, dead),
        }
    }

    // --- Replica pulling ---

    /// Snapshots the shards of the two nearest predecessors into the replica cache, each
    /// tagged with its source. A failed pull keeps that source's previous snapshot; sources
    /// that left the chain are dropped.
    pub async fn pull_replicas(&self) -> Result<()> {
        let [primary, backup, _] = self.predecessor_chain();

        for source in [primary, backup].into_iter().flatten() {
            match source.send_data().await {
                Ok(data) => {
                    self.state.lock().replicas.record(source, data);
                }
                Err(e) => debug!("Replica pull from {} failed: {}", source, e),
            }
        }

        let mut state = self.state.lock();
        let chain = state.predecessors.clone();
        state.replicas.retain_sources(&chain);
        Ok(())
    }
}
