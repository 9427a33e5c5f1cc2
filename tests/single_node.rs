//! Single-node tests: bootstrap, the basic read/write contract, restart
//! recovery, and the HTTP adapter.

mod common;

use raftkv::{HttpService, Store};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// A fresh node with `enable_single` bootstraps itself, elects itself
/// leader, and serves the basic write/read/delete round trip.
#[tokio::test]
async fn bootstrap_and_read_write() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let addr = format!("127.0.0.1:{}", common::next_port());

    let config = common::test_config(1, &addr, temp_dir.path());
    let mut store = Store::open(config, true).await.expect("open store");

    assert!(
        common::wait_until_leader(&store, 3000).await,
        "single node should elect itself"
    );
    assert_eq!(store.current_leader().await, Some(1));

    store.set("user1", "batman").await.expect("set");
    assert_eq!(store.get("user1").await, "batman");

    store.delete("user1").await.expect("delete");
    assert_eq!(store.get("user1").await, "");

    store.shutdown().await.expect("shutdown");
}

/// Restarting a node replays the log into the state machine.
#[tokio::test]
async fn reopen_replays_the_log() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let addr = format!("127.0.0.1:{}", common::next_port());

    {
        let config = common::test_config(1, &addr, temp_dir.path());
        let mut store = Store::open(config, true).await.expect("open store");
        assert!(common::wait_until_leader(&store, 3000).await);

        store.set("user1", "batman").await.expect("set");
        store.set("user2", "robin").await.expect("set");
        store.delete("user2").await.expect("delete");

        store.shutdown().await.expect("shutdown");
    }

    // Let the old transport listener wind down before rebinding the port.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let config = common::test_config(1, &addr, temp_dir.path());
    let mut store = Store::open(config, true).await.expect("reopen store");
    assert!(common::wait_until_leader(&store, 5000).await);

    assert_eq!(store.get("user1").await, "batman");
    assert_eq!(store.get("user2").await, "");

    store.shutdown().await.expect("shutdown");
}

/// Restart recovery from a snapshot alone: with the raw log gone but
/// `snapshots/` and `peers.json` retained, every snapshotted key survives.
#[tokio::test]
async fn restart_recovers_from_snapshot_without_log() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let addr = format!("127.0.0.1:{}", common::next_port());

    {
        let config = common::test_config(1, &addr, temp_dir.path());
        let mut store = Store::open(config, true).await.expect("open store");
        assert!(common::wait_until_leader(&store, 3000).await);

        for i in 0..20 {
            store
                .set(format!("key{}", i), format!("value{}", i))
                .await
                .expect("set");
        }

        store.trigger_snapshot().await.expect("trigger snapshot");

        // Wait until the snapshot covers every write.
        let wanted = store.metrics().last_applied;
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let snapshot = store.metrics().snapshot;
            if snapshot.is_some() && snapshot >= wanted {
                break;
            }
            assert!(Instant::now() < deadline, "snapshot was never taken");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        store.shutdown().await.expect("shutdown");
    }

    // Remove the raw log; keep vote.json, snapshots/, and peers.json.
    std::fs::remove_dir_all(temp_dir.path().join("log")).expect("remove log dir");
    assert!(temp_dir.path().join("snapshots").exists());
    assert!(temp_dir.path().join("peers.json").exists());

    // Let the old transport listener wind down before rebinding the port.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let config = common::test_config(1, &addr, temp_dir.path());
    let mut store = Store::open(config, true).await.expect("reopen store");
    assert!(common::wait_until_leader(&store, 5000).await);

    for i in 0..20 {
        assert_eq!(
            store.get(&format!("key{}", i)).await,
            format!("value{}", i),
            "key{} should survive the lost log",
            i
        );
    }

    // The recovered node keeps accepting writes.
    store.set("post-restart", "ok").await.expect("set");
    assert_eq!(store.get("post-restart").await, "ok");

    store.shutdown().await.expect("shutdown");
}

/// The peer directory is written once the bootstrap membership commits.
#[tokio::test]
async fn bootstrap_records_the_peer_directory() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let addr = format!("127.0.0.1:{}", common::next_port());

    let config = common::test_config(1, &addr, temp_dir.path());
    let mut store = Store::open(config, true).await.expect("open store");
    assert!(common::wait_until_leader(&store, 3000).await);

    // The file appears once the bootstrap membership entry is applied.
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let peers = raftkv::peers::read_peers(temp_dir.path()).expect("read peers");
        if peers == vec![addr.clone()] {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "peer directory was never written, last saw {:?}",
            peers
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    store.shutdown().await.expect("shutdown");
}

/// The HTTP adapter round trip: set through POST, read through GET, delete.
#[tokio::test]
async fn http_adapter_round_trip() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let addr = format!("127.0.0.1:{}", common::next_port());

    let config = common::test_config(1, &addr, temp_dir.path());
    let store = Arc::new(Store::open(config, true).await.expect("open store"));
    assert!(common::wait_until_leader(&store, 3000).await);

    let http = HttpService::new("127.0.0.1:0", Arc::clone(&store));
    let http_addr = http.start().await.expect("start http");
    let base = format!("http://{}", http_addr);
    let client = reqwest::Client::new();

    // Set through the adapter.
    let resp = client
        .post(format!("{}/key", base))
        .json(&serde_json::json!({"user1": "batman"}))
        .send()
        .await
        .expect("post /key");
    assert!(resp.status().is_success());

    // Read it back.
    let body: std::collections::HashMap<String, String> = client
        .get(format!("{}/key/user1", base))
        .send()
        .await
        .expect("get /key/user1")
        .json()
        .await
        .expect("json body");
    assert_eq!(body.get("user1").map(String::as_str), Some("batman"));

    // Delete and observe the empty value.
    let resp = client
        .delete(format!("{}/key/user1", base))
        .send()
        .await
        .expect("delete /key/user1");
    assert!(resp.status().is_success());

    let body: std::collections::HashMap<String, String> = client
        .get(format!("{}/key/user1", base))
        .send()
        .await
        .expect("get /key/user1")
        .json()
        .await
        .expect("json body");
    assert_eq!(body.get("user1").map(String::as_str), Some(""));

    // Status reports the leader role.
    let status: serde_json::Value = client
        .get(format!("{}/status", base))
        .send()
        .await
        .expect("get /status")
        .json()
        .await
        .expect("json body");
    assert_eq!(status["role"], "leader");
    assert_eq!(status["node_id"], 1);
}

/// A key-less read or delete is rejected with 400 instead of being served
/// against the empty key.
#[tokio::test]
async fn http_adapter_rejects_empty_keys() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let addr = format!("127.0.0.1:{}", common::next_port());

    let config = common::test_config(1, &addr, temp_dir.path());
    let store = Arc::new(Store::open(config, true).await.expect("open store"));
    assert!(common::wait_until_leader(&store, 3000).await);

    let http = HttpService::new("127.0.0.1:0", Arc::clone(&store));
    let http_addr = http.start().await.expect("start http");
    let base = format!("http://{}", http_addr);
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/key", base))
        .send()
        .await
        .expect("get /key");
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let resp = client
        .delete(format!("{}/key", base))
        .send()
        .await
        .expect("delete /key");
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}
