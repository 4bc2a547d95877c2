//! Command dispatcher: one request line in, one reply out, connection closed.

use super::service::ChordNode;
use crate::app::types::SubmitJobResponse;
use crate::transport::peer::CALL_TIMEOUT;
use crate::transport::protocol::MAX_REQUEST_BYTES;
use crate::transport::{Command, Reply};

use anyhow::Result;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

impl ChordNode {
    /// Accept loop of the command listener. Every connection is handled on its own task.
    pub(crate) async fn serve(self: Arc<Self>) {
        tracing::info!("Node {} accepting commands", self.local);

        loop {
            match self.listener.accept().await {
                Ok((stream, remote)) => {
                    let node = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = node.handle_connection(stream, remote).await {
                            debug!("Connection from {} dropped: {:#}", remote, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            }
        }
    }

    async fn handle_connection(
        self: &Arc<Self>,
        mut stream: TcpStream,
        remote: SocketAddr,
    ) -> Result<()> {
        let mut line = String::new();
        {
            let mut reader = BufReader::new(&mut stream).take(MAX_REQUEST_BYTES as u64);
            tokio::time::timeout(CALL_TIMEOUT, reader.read_line(&mut line)).await??;
        }

        let Some(command) = Command::parse(&line) else {
            debug!("Ignoring malformed request from {}: {:?}", remote, truncate(&line));
            return Ok(());
        };
        tracing::trace!("<- {} {:?}", remote, command);

        if let Some(body) = self.handle_command(command).await.into_wire() {
            stream.write_all(body.as_bytes()).await?;
        }
        stream.shutdown().await?;
        Ok(())
    }

    /// Executes one decoded command against the local node.
    pub async fn handle_command(self: &Arc<Self>, command: Command) -> Reply {
        match command {
            Command::FindSuccessor(id) => match self.find_successor(id).await {
                Ok(peer) => Reply::Peer(peer),
                Err(e) => {
                    debug!("FIND_SUCCESSOR {} failed on {}: {:#}", id, self.local, e);
                    Reply::Empty
                }
            },
            Command::FindPredecessor(id) => match self.find_predecessor(id).await {
                Ok(peer) => Reply::Peer(peer),
                Err(e) => {
                    debug!("FIND_PREDECESSOR {} failed on {}: {:#}", id, self.local, e);
                    Reply::Empty
                }
            },
            Command::GetSuccessor => Reply::Peer(self.successor()),
            Command::GetPredecessor => self.predecessor().map_or(Reply::Empty, Reply::Peer),
            Command::Notify(peer) => {
                self.notify(peer);
                Reply::Ack
            }
            Command::Check => Reply::Ack,
            Command::ClosestPrecedingFinger(id) => Reply::Peer(self.closest_preceding_finger(id)),
            Command::StoreKey { key, value } => {
                self.store_local(key, value);
                Reply::Ack
            }
            Command::RetrieveKey(key) => self.get_local(&key).map_or(Reply::Empty, Reply::Json),
            Command::UpdateSuccessor(peer) => {
                self.update_successor(peer);
                Reply::Ack
            }
            Command::UpdatePredecessor(peer) => {
                self.update_predecessor(peer);
                Reply::Ack
            }
            Command::SendData => json_reply(&self.shard_snapshot()),
            Command::SubmitJob { handler, key } => match self.accept_job(&handler, &key) {
                Some(job_id) => json_reply(&SubmitJobResponse { job_id }),
                None => Reply::Empty,
            },
            Command::FetchSummaries => json_reply(&self.shard_snapshot().summaries()),
            Command::ReportResult { key, value } => match self.try_store_key(&key, value).await {
                Ok(_) => Reply::Ack,
                Err(e) => {
                    warn!("Could not record result for {}: {:#}", key, e);
                    Reply::Empty
                }
            },
        }
    }
}

fn json_reply<T: Serialize>(body: &T) -> Reply {
    match serde_json::to_value(body) {
        Ok(value) => Reply::Json(value),
        Err(e) => {
            warn!("Failed to encode reply: {}", e);
            Reply::Empty
        }
    }
}

fn truncate(line: &str) -> &str {
    let end = line
        .char_indices()
        .nth(80)
        .map_or(line.len(), |(index, _)| index);
    &line[..end]
}
