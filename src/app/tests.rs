//! Application Module Tests
//!
//! ## Test Scopes
//! - **Registry**: handler registration, lookup and execution.
//! - **Jobs**: `SUBMIT_JOB` on the owning node, local and remote, with results written back.
//! - **Client**: typed `send` / `get` through the ring.
//! - **Summaries**: datagram codec, board deduplication, ring-wide collection and the
//!   ring-maximum broadcast.

#[cfg(test)]
mod tests {
    use crate::app::client::RingClient;
    use crate::app::registry::JobRegistry;
    use crate::app::summary::{SummaryBoard, decode_summary, encode_summary};
    use crate::app::types::{Job, JobId, RecordSummary};
    use crate::node::testkit::{key_hashing_to, spawn_node, spawn_ring, spawn_with, test_config};
    use crate::ring::RingSpace;
    use serde::{Deserialize, Serialize};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::UdpSocket;

    const BITS: u32 = 8;

    fn job(handler: &str, record: Value) -> Job {
        Job {
            id: JobId::new(),
            handler: handler.to_string(),
            key: "k".to_string(),
            record,
        }
    }

    fn double_registry() -> Arc<JobRegistry> {
        let registry = JobRegistry::new();
        registry.register("double", |job| async move {
            let n = job.record.as_i64().unwrap_or(0);
            Ok(json!(n * 2))
        });
        registry
    }

    /// Polls until `key` holds `expected` locally on `node`, or gives up after ~2s.
    async fn wait_for_local(node: &crate::node::ChordNode, key: &str, expected: &Value) -> bool {
        for _ in 0..100 {
            if node.get_local(key).as_ref() == Some(expected) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    // ============================================================
    // TEST 1: JobRegistry - Registration and Execution
    // ============================================================

    #[tokio::test]
    async fn test_registry_register_and_execute() {
        // ARRANGE: Create registry and call counter
        let registry = JobRegistry::new();
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        // ACT: Register handler
        registry.register("count", move |job| {
            let count = call_count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(job.record)
            }
        });

        // ASSERT: Handler is registered
        assert!(registry.has_handler("count"));
        assert_eq!(registry.handler_count(), 1);
        assert_eq!(registry.list_handlers(), vec!["count".to_string()]);

        // ACT: Execute job
        let result = registry.execute(&job("count", json!({"test": "data"}))).await;

        // ASSERT: Handler ran and passed the record through
        assert_eq!(result.unwrap(), json!({"test": "data"}));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registry_unknown_handler_returns_error() {
        let registry = JobRegistry::new();

        let result = registry.execute(&job("non_existent", json!({}))).await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Unknown job handler"));
    }

    #[tokio::test]
    async fn test_registry_handler_can_fail() {
        let registry = JobRegistry::new();
        registry.register("failing", |_job| async {
            Err(anyhow::anyhow!("Intentional error"))
        });

        let result = registry.execute(&job("failing", json!(null))).await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Intentional error"));
    }

    #[tokio::test]
    async fn test_registry_replaces_handler_with_same_name() {
        let registry = JobRegistry::new();
        registry.register("h", |_job| async { Ok(json!(1)) });
        registry.register("h", |_job| async { Ok(json!(2)) });

        assert_eq!(registry.handler_count(), 1);
        assert_eq!(registry.execute(&job("h", json!(null))).await.unwrap(), json!(2));
    }

    // ============================================================
    // TEST 2: Jobs on the Ring
    // ============================================================

    #[tokio::test]
    async fn test_local_job_writes_result_back() {
        // ARRANGE
        let node = spawn_with(test_config(42, BITS), double_registry()).await;
        node.store_local("score".to_string(), json!(21));
        let client = RingClient::new(node.node.clone());

        // ACT
        let job_id = client.trigger("double", "score").await.unwrap();

        // ASSERT
        assert!(!job_id.0.is_empty());
        assert!(wait_for_local(&node, "score", &json!(42)).await);
    }

    #[tokio::test]
    async fn test_job_declined_without_handler_or_record() {
        let node = spawn_with(test_config(42, BITS), double_registry()).await;
        node.store_local("score".to_string(), json!(1));
        let client = RingClient::new(node.node.clone());

        assert!(client.trigger("unknown", "score").await.is_err());
        assert!(client.trigger("double", "missing").await.is_err());
        assert_eq!(node.get_local("score"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_remote_job_runs_on_owner() {
        // ARRANGE: 200 owns the key and has the handler; 10 only forwards
        let first = spawn_node(10, BITS).await;
        let owner = spawn_with(test_config(200, BITS), double_registry()).await;
        owner.join(&first.local).await.unwrap();
        first.stabilize().await.unwrap();
        owner.stabilize().await.unwrap();

        let key = key_hashing_to(&RingSpace::new(BITS).unwrap(), 150);
        first.try_store_key(&key, json!(5)).await.unwrap();

        // ACT
        let client = RingClient::new(first.node.clone());
        client.trigger("double", &key).await.unwrap();

        // ASSERT
        assert!(wait_for_local(&owner, &key, &json!(10)).await);
        assert_eq!(first.retrieve_key(&key).await, Some(json!(10)));
    }

    #[tokio::test]
    async fn test_report_result_routes_to_owner() {
        // ARRANGE
        let nodes = spawn_ring(&[10, 200], BITS).await;
        let key = key_hashing_to(&RingSpace::new(BITS).unwrap(), 150);

        // ACT: Report through the node that does not own the key
        nodes[0].local.report_result(&key, &json!("final")).await.unwrap();

        // ASSERT
        assert_eq!(nodes[1].get_local(&key), Some(json!("final")));
        assert!(nodes[0].get_local(&key).is_none());
    }

    // ============================================================
    // TEST 3: RingClient
    // ============================================================

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Bracket {
        round: u32,
        teams: Vec<String>,
    }

    #[tokio::test]
    async fn test_client_send_and_get() {
        // ARRANGE
        let nodes = spawn_ring(&[10, 100, 200], BITS).await;
        let writer = RingClient::new(nodes[0].node.clone());
        let reader = RingClient::new(nodes[2].node.clone());
        let bracket = Bracket {
            round: 1,
            teams: vec!["red".to_string(), "blue".to_string()],
        };

        // ACT
        writer.send("bracket", &bracket).await.unwrap();

        // ASSERT
        assert_eq!(reader.get::<Bracket>("bracket").await.unwrap(), Some(bracket));
        assert_eq!(reader.get::<Bracket>("nothing").await.unwrap(), None);
        assert!(reader.get::<u32>("bracket").await.is_err());
    }

    // ============================================================
    // TEST 4: Summary Channel
    // ============================================================

    fn summary(key: &str, value: Value) -> RecordSummary {
        RecordSummary {
            key: key.to_string(),
            value,
        }
    }

    #[test]
    fn test_summary_datagram_codec() {
        let records = vec![summary("a", json!(1)), summary("b|c", json!({"x": "y|z"}))];

        let datagram = encode_summary(&records).unwrap();

        assert!(datagram.starts_with("SUMMARY|"));
        assert_eq!(decode_summary(&datagram), Some(records));
        assert!(decode_summary("JOIN,1,127.0.0.1,8001").is_none());
        assert!(decode_summary("SUMMARY|not json").is_none());
    }

    #[test]
    fn test_summary_board_deduplicates() {
        // ARRANGE
        let board = SummaryBoard::new();

        // ACT & ASSERT: The same broadcast twice changes nothing the second time
        let records = vec![summary("a", json!(1)), summary("b", json!(2))];
        assert_eq!(board.apply(records.clone()), 2);
        assert_eq!(board.apply(records), 0);
        assert_eq!(board.len(), 2);

        // ACT & ASSERT: A newer value replaces the old one
        assert_eq!(board.apply(vec![summary("a", json!(10))]), 1);
        assert_eq!(board.get("a"), Some(json!(10)));
        assert_eq!(
            board.snapshot(),
            vec![summary("a", json!(10)), summary("b", json!(2))]
        );
    }

    #[tokio::test]
    async fn test_collect_ring_summaries() {
        // ARRANGE: One record on each node
        let nodes = spawn_ring(&[10, 100, 200], BITS).await;
        for (i, node) in nodes.iter().enumerate() {
            node.store_local(format!("record-{}", i), json!(i));
        }

        // ACT
        let records = nodes[1].collect_ring_summaries().await.unwrap();

        // ASSERT
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["record-0", "record-1", "record-2"]);
    }

    #[tokio::test]
    async fn test_only_ring_maximum_broadcasts() {
        // ARRANGE: Point the summary channel at a local socket
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut configs = Vec::new();
        for id in [10, 200] {
            let mut config = test_config(id, BITS);
            config.summary.broadcast_addr = "127.0.0.1".parse().unwrap();
            config.summary.port = port;
            configs.push(config);
        }
        let low = spawn_with(configs.remove(0), JobRegistry::new()).await;
        let high = spawn_with(configs.remove(0), JobRegistry::new()).await;
        high.join(&low.local).await.unwrap();
        low.stabilize().await.unwrap();
        high.stabilize().await.unwrap();
        low.store_local("a".to_string(), json!(1));
        high.store_local("b".to_string(), json!(2));

        // ACT & ASSERT: The lower node stays quiet
        assert!(!low.broadcast_summaries().await.unwrap());

        // ACT & ASSERT: The maximum sends the whole ring
        assert!(high.broadcast_summaries().await.unwrap());

        let mut buf = vec![0u8; 65_536];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let records = decode_summary(std::str::from_utf8(&buf[..len]).unwrap()).unwrap();
        assert_eq!(records, vec![summary("a", json!(1)), summary("b", json!(2))]);
        assert_eq!(high.summary_board().len(), 2);
    }
}
