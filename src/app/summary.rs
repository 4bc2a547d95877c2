//! Summary channel.
//!
//! The node with the largest id walks the ring, gathers every record and broadcasts the
//! list as `SUMMARY|<json>`. Delivery is best effort; listeners fold whatever arrives into a
//! board keyed by record key, so duplicates and reordering are harmless.

use super::types::RecordSummary;
use crate::node::ChordNode;
use crate::node::service::MAX_LOOKUP_HOPS;

use anyhow::Result;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

pub const SUMMARY_TAG: &str = "SUMMARY";

/// Largest payload we are willing to put in one UDP datagram.
pub const MAX_DATAGRAM_BYTES: usize = 65_000;

pub fn encode_summary(records: &[RecordSummary]) -> Result<String> {
    Ok(format!("{}|{}", SUMMARY_TAG, serde_json::to_string(records)?))
}

pub fn decode_summary(datagram: &str) -> Option<Vec<RecordSummary>> {
    let (tag, json) = datagram.split_once('|')?;
    if tag != SUMMARY_TAG {
        return None;
    }
    serde_json::from_str(json).ok()
}

/// Latest known value of every record seen on the summary channel.
#[derive(Debug, Default)]
pub struct SummaryBoard {
    entries: DashMap<String, Value>,
}

impl SummaryBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a summary list into the board. Returns how many entries were new or changed.
    pub fn apply(&self, records: Vec<RecordSummary>) -> usize {
        let mut changed = 0;
        for record in records {
            let previous = self.entries.insert(record.key, record.value.clone());
            if previous.as_ref() != Some(&record.value) {
                changed += 1;
            }
        }
        changed
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, sorted by key.
    pub fn snapshot(&self) -> Vec<RecordSummary> {
        let mut records: Vec<RecordSummary> = self
            .entries
            .iter()
            .map(|entry| RecordSummary {
                key: entry.key().clone(),
                value: entry.value().clone(),
            })
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }
}

impl ChordNode {
    /// Walks the successor pointers once around the ring and collects every node's records.
    /// An unreachable node ends the walk early with what was gathered so far.
    pub async fn collect_ring_summaries(&self) -> Result<Vec<RecordSummary>> {
        let mut merged: BTreeMap<String, Value> = self
            .shard_snapshot()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut visited = HashSet::from([self.local.id]);
        let mut current = self.successor();

        for _ in 0..MAX_LOOKUP_HOPS {
            if !visited.insert(current.id) {
                break;
            }

            let records = match current.fetch_summaries().await {
                Ok(records) => records,
                Err(e) => {
                    warn!("Summary walk stopped at {}: {}", current, e);
                    break;
                }
            };
            for record in records {
                merged.entry(record.key).or_insert(record.value);
            }

            current = match current.successor().await {
                Ok(next) => next,
                Err(e) => {
                    warn!("Summary walk stopped after {}: {}", current, e);
                    break;
                }
            };
        }

        Ok(merged
            .into_iter()
            .map(|(key, value)| RecordSummary { key, value })
            .collect())
    }

    /// One broadcast round. Only the ring maximum speaks; returns whether it did.
    pub async fn broadcast_summaries(&self) -> Result<bool> {
        if !self.is_ring_maximum() {
            return Ok(false);
        }

        let records = self.collect_ring_summaries().await?;
        let message = encode_summary(&records)?;
        if message.len() > MAX_DATAGRAM_BYTES {
            warn!(
                "Summary of {} records is {} bytes, too large to broadcast",
                records.len(),
                message.len()
            );
            return Ok(false);
        }

        let summary = &self.config.summary;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        socket
            .send_to(message.as_bytes(), (summary.broadcast_addr, summary.port))
            .await?;

        self.summaries.apply(records);
        debug!("Node {} broadcast the ring summary", self.local);
        Ok(true)
    }

    /// Starts the summary listener and the periodic broadcaster.
    pub fn start_summary_channel(self: &Arc<Self>) {
        let node = self.clone();
        tokio::spawn(async move {
            node.summary_listener().await;
        });

        self.spawn_periodic(
            "summary",
            self.config.summary.interval(),
            |node| async move { node.broadcast_summaries().await.map(|_| ()) },
        );
    }

    async fn summary_listener(self: Arc<Self>) {
        let port = self.config.summary.port;
        let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!("Cannot listen for summaries on port {}: {}", port, e);
                return;
            }
        };
        info!("Listening for summaries on port {}", port);

        let mut buf = vec![0u8; 65_536];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    let datagram = std::str::from_utf8(&buf[..len]).ok();
                    let Some(records) = datagram.and_then(decode_summary) else {
                        debug!("Ignoring malformed summary datagram from {}", src);
                        continue;
                    };

                    let changed = self.summaries.apply(records);
                    if changed > 0 {
                        debug!("Summary from {} updated {} records", src, changed);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to receive summary datagram: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
}
