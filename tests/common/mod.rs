//! Common test utilities for integration tests.

use raftkv::{NodeId, Store, StoreConfig};
use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Atomic counter for allocating unique ports.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(21000);

/// Get a unique port for testing.
pub fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Build a store config with test-friendly timings.
pub fn test_config(node_id: NodeId, raft_addr: &str, dir: &Path) -> StoreConfig {
    StoreConfig::builder()
        .node_id(node_id)
        .raft_bind(raft_addr)
        .data_dir(dir)
        .snapshot_threshold(500)
        .build()
        .expect("valid config")
}

/// Test context that holds temp directories and nodes.
#[allow(dead_code)]
pub struct TestCluster {
    /// Temp directories for each node (kept alive for the test duration).
    pub temp_dirs: Vec<TempDir>,
    /// Store nodes, in node-id order (node i has id i + 1).
    pub nodes: Vec<Store>,
    /// Raft addresses, parallel to `nodes`.
    pub raft_addrs: Vec<String>,
}

#[allow(dead_code)]
impl TestCluster {
    /// Start `node_count` nodes with empty data dirs. The first node
    /// bootstraps a single-node cluster; the rest wait to be joined.
    pub async fn new(node_count: usize) -> Self {
        let mut temp_dirs = Vec::with_capacity(node_count);
        let mut nodes = Vec::with_capacity(node_count);
        let mut raft_addrs = Vec::with_capacity(node_count);

        for i in 0..node_count {
            let port = next_port();
            let addr = format!("127.0.0.1:{}", port);
            let temp_dir = TempDir::new().expect("create temp dir");

            let config = test_config(i as NodeId + 1, &addr, temp_dir.path());
            let node = Store::open(config, i == 0).await.expect("open store");

            raft_addrs.push(addr);
            temp_dirs.push(temp_dir);
            nodes.push(node);
        }

        Self {
            temp_dirs,
            nodes,
            raft_addrs,
        }
    }

    /// Join every other node to the cluster through the first node.
    pub async fn join_all(&self) {
        for i in 1..self.nodes.len() {
            self.nodes[0]
                .join(i as NodeId + 1, self.raft_addrs[i].clone())
                .await
                .expect("join should succeed");
        }
    }

    /// Wait for any node to observe a leader.
    pub async fn wait_for_leader(&self, timeout_ms: u64) -> Option<NodeId> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            for node in &self.nodes {
                if let Some(leader) = node.current_leader().await {
                    return Some(leader);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Index of the node currently reporting itself leader, if any.
    pub async fn leader_index(&self) -> Option<usize> {
        for (i, node) in self.nodes.iter().enumerate() {
            if node.is_leader().await {
                return Some(i);
            }
        }
        None
    }

    /// Shutdown all nodes.
    pub async fn shutdown(&mut self) {
        for node in &mut self.nodes {
            let _ = node.shutdown().await;
        }
    }
}

/// Poll until the node reports itself leader; false on timeout.
#[allow(dead_code)]
pub async fn wait_until_leader(store: &Store, timeout_ms: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if store.is_leader().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Poll until `get(key)` on the node returns `expected`; false on timeout.
#[allow(dead_code)]
pub async fn wait_for_value(store: &Store, key: &str, expected: &str, timeout_ms: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if store.get(key).await == expected {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
