//! Remote calls issued through a [`PeerHandle`].
//!
//! Each method is one connection. Liveness-sensitive calls share a short timeout so a dead
//! peer stalls only the protocol that asked; bulk transfers get a longer one.

use super::error::TransportError;
use super::protocol::{ACK, Command, MAX_REQUEST_BYTES, is_valid_key};
use super::types::PeerHandle;
use crate::app::types::{JobId, RecordSummary, SubmitJobResponse};
use crate::ring::NodeId;
use crate::storage::shard::KeyShard;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const CALL_TIMEOUT: Duration = Duration::from_secs(3);
pub const BULK_TIMEOUT: Duration = Duration::from_secs(20);

const MAX_RESPONSE_BYTES: u64 = 64 * 1024 * 1024;

impl PeerHandle {
    pub async fn find_successor(&self, id: NodeId) -> Result<PeerHandle, TransportError> {
        let body = self.call(&Command::FindSuccessor(id), CALL_TIMEOUT).await?;
        self.expect_peer(&body)
    }

    pub async fn find_predecessor(&self, id: NodeId) -> Result<PeerHandle, TransportError> {
        let body = self.call(&Command::FindPredecessor(id), CALL_TIMEOUT).await?;
        self.expect_peer(&body)
    }

    pub async fn closest_preceding_finger(&self, id: NodeId) -> Result<PeerHandle, TransportError> {
        let body = self
            .call(&Command::ClosestPrecedingFinger(id), CALL_TIMEOUT)
            .await?;
        self.expect_peer(&body)
    }

    pub async fn successor(&self) -> Result<PeerHandle, TransportError> {
        let body = self.call(&Command::GetSuccessor, CALL_TIMEOUT).await?;
        self.expect_peer(&body)
    }

    /// `Ok(None)` when the peer has no predecessor yet.
    pub async fn predecessor(&self) -> Result<Option<PeerHandle>, TransportError> {
        let body = self.call(&Command::GetPredecessor, CALL_TIMEOUT).await?;
        if body.is_empty() {
            return Ok(None);
        }
        self.expect_peer(&body).map(Some)
    }

    pub async fn update_successor(&self, node: &PeerHandle) -> Result<(), TransportError> {
        let body = self
            .call(&Command::UpdateSuccessor(node.clone()), CALL_TIMEOUT)
            .await?;
        self.expect_ack(&body)
    }

    pub async fn update_predecessor(&self, node: &PeerHandle) -> Result<(), TransportError> {
        let body = self
            .call(&Command::UpdatePredecessor(node.clone()), CALL_TIMEOUT)
            .await?;
        self.expect_ack(&body)
    }

    pub async fn notify(&self, node: &PeerHandle) -> Result<(), TransportError> {
        let body = self.call(&Command::Notify(node.clone()), CALL_TIMEOUT).await?;
        self.expect_ack(&body)
    }

    /// Liveness probe.
    pub async fn check(&self) -> Result<(), TransportError> {
        let body = self.call(&Command::Check, CALL_TIMEOUT).await?;
        self.expect_ack(&body)
    }

    pub async fn store_key(&self, key: &str, value: &Value) -> Result<(), TransportError> {
        self.require_valid_key(key)?;
        let command = Command::StoreKey {
            key: key.to_string(),
            value: value.clone(),
        };
        let body = self.call(&command, CALL_TIMEOUT).await?;
        self.expect_ack(&body)
    }

    /// `Ok(None)` when the peer does not hold `key`.
    pub async fn retrieve_key(&self, key: &str) -> Result<Option<Value>, TransportError> {
        self.require_valid_key(key)?;
        let body = self
            .call(&Command::RetrieveKey(key.to_string()), CALL_TIMEOUT)
            .await?;
        if body.is_empty() {
            return Ok(None);
        }
        self.expect_json(&body).map(Some)
    }

    /// Full dump of the peer's shard.
    pub async fn send_data(&self) -> Result<KeyShard, TransportError> {
        let body = self.call(&Command::SendData, BULK_TIMEOUT).await?;
        self.expect_json(&body)
    }

    /// `Ok(None)` when the peer declined the job (unknown handler or missing record).
    pub async fn submit_job(
        &self,
        handler: &str,
        key: &str,
    ) -> Result<Option<JobId>, TransportError> {
        self.require_valid_key(key)?;
        let command = Command::SubmitJob {
            handler: handler.to_string(),
            key: key.to_string(),
        };
        let body = self.call(&command, CALL_TIMEOUT).await?;
        if body.is_empty() {
            return Ok(None);
        }
        let response: SubmitJobResponse = self.expect_json(&body)?;
        Ok(Some(response.job_id))
    }

    pub async fn fetch_summaries(&self) -> Result<Vec<RecordSummary>, TransportError> {
        let body = self.call(&Command::FetchSummaries, BULK_TIMEOUT).await?;
        self.expect_json(&body)
    }

    pub async fn report_result(&self, key: &str, value: &Value) -> Result<(), TransportError> {
        self.require_valid_key(key)?;
        let command = Command::ReportResult {
            key: key.to_string(),
            value: value.clone(),
        };
        let body = self.call(&command, CALL_TIMEOUT).await?;
        self.expect_ack(&body)
    }

    async fn call(&self, command: &Command, timeout: Duration) -> Result<String, TransportError> {
        let mut request = command.encode();
        if request.len() >= MAX_REQUEST_BYTES {
            return Err(self.malformed("request exceeds the size limit"));
        }
        request.push('\n');

        tracing::trace!("-> {} {}", self, request.trim_end());

        match tokio::time::timeout(timeout, self.exchange(request.as_bytes())).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout { addr: self.addr }),
        }
    }

    async fn exchange(&self, request: &[u8]) -> Result<String, TransportError> {
        let unreachable = |source: std::io::Error| TransportError::Unreachable {
            addr: self.addr,
            source,
        };

        let mut stream = TcpStream::connect(self.addr).await.map_err(unreachable)?;
        stream.write_all(request).await.map_err(unreachable)?;
        stream.shutdown().await.map_err(unreachable)?;

        let mut buf = Vec::new();
        (&mut stream)
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut buf)
            .await
            .map_err(unreachable)?;

        String::from_utf8(buf).map_err(|_| self.malformed("response is not UTF-8"))
    }

    fn expect_peer(&self, body: &str) -> Result<PeerHandle, TransportError> {
        PeerHandle::decode(body).ok_or_else(|| {
            self.malformed(if body.is_empty() {
                "closed without a peer".to_string()
            } else {
                format!("expected a peer, got {:?}", body)
            })
        })
    }

    fn expect_ack(&self, body: &str) -> Result<(), TransportError> {
        if body == ACK {
            Ok(())
        } else {
            Err(self.malformed(format!("expected {}, got {:?}", ACK, body)))
        }
    }

    fn expect_json<T: DeserializeOwned>(&self, body: &str) -> Result<T, TransportError> {
        serde_json::from_str(body).map_err(|e| self.malformed(format!("invalid JSON: {}", e)))
    }

    fn require_valid_key(&self, key: &str) -> Result<(), TransportError> {
        if is_valid_key(key) {
            Ok(())
        } else {
            Err(self.malformed(format!("key {:?} cannot be sent on the wire", key)))
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> TransportError {
        TransportError::Malformed {
            addr: self.addr,
            reason: reason.into(),
        }
    }
}
