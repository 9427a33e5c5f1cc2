//! Multi-node cluster tests: membership, replication, leader-only writes,
//! and failover.

mod common;

use common::TestCluster;
use raftkv::{NodeId, StoreError};
use std::time::{Duration, Instant};

/// A follower refuses writes with the typed not-leader error and no entry
/// is replicated anywhere.
#[tokio::test]
async fn follower_rejects_writes() {
    let mut cluster = TestCluster::new(2).await;
    cluster.wait_for_leader(3000).await.expect("leader elected");
    cluster.join_all().await;

    let err = cluster.nodes[1]
        .set("k", "v")
        .await
        .expect_err("write on a follower must fail");
    assert!(
        matches!(err, StoreError::NotLeader { .. }),
        "expected NotLeader, got {:?}",
        err
    );

    // Same contract for delete.
    let err = cluster.nodes[1]
        .delete("k")
        .await
        .expect_err("delete on a follower must fail");
    assert!(matches!(err, StoreError::NotLeader { .. }));

    // Nothing was replicated on either node.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cluster.nodes[0].get("k").await, "");
    assert_eq!(cluster.nodes[1].get("k").await, "");

    cluster.shutdown().await;
}

/// A committed write on the leader becomes visible on every member within a
/// bounded settle time.
#[tokio::test]
async fn writes_propagate_to_all_members() {
    let mut cluster = TestCluster::new(3).await;
    cluster.wait_for_leader(3000).await.expect("leader elected");
    cluster.join_all().await;

    cluster.nodes[0]
        .set("user2", "robin")
        .await
        .expect("set on leader");

    for (i, node) in cluster.nodes.iter().enumerate() {
        assert!(
            common::wait_for_value(node, "user2", "robin", 3000).await,
            "node {} should converge on the written value",
            i + 1
        );
    }

    cluster.shutdown().await;
}

/// Joining streams the existing state to the new member, later writes keep
/// converging, and the peer directory records the grown membership.
#[tokio::test]
async fn join_streams_existing_state() {
    let mut cluster = TestCluster::new(2).await;
    cluster.wait_for_leader(3000).await.expect("leader elected");

    // State written before the second node joins.
    cluster.nodes[0]
        .set("user4", "riddler")
        .await
        .expect("set before join");

    cluster.join_all().await;

    assert!(
        common::wait_for_value(&cluster.nodes[1], "user4", "riddler", 5000).await,
        "pre-join state should reach the new member"
    );

    cluster.nodes[0]
        .set("user5", "alfred")
        .await
        .expect("set after join");
    assert!(common::wait_for_value(&cluster.nodes[1], "user5", "alfred", 3000).await);

    // Both data dirs now record both members.
    for temp_dir in &cluster.temp_dirs {
        let peers = raftkv::peers::read_peers(temp_dir.path()).expect("read peers");
        assert_eq!(peers.len(), 2, "peer directory should list both members");
    }

    cluster.shutdown().await;
}

/// Killing the leader of a three-node cluster elects a survivor that keeps
/// accepting writes, and the survivors converge.
#[tokio::test]
async fn leader_failover() {
    let mut cluster = TestCluster::new(3).await;
    cluster.wait_for_leader(3000).await.expect("leader elected");
    cluster.join_all().await;

    let leader_idx = cluster.leader_index().await.expect("a node leads");
    let mut dead = cluster.nodes.remove(leader_idx);
    cluster.raft_addrs.remove(leader_idx);
    dead.shutdown().await.expect("shutdown leader");

    // One of the survivors takes over.
    let deadline = Instant::now() + Duration::from_secs(10);
    let new_leader_idx = loop {
        if let Some(idx) = cluster.leader_index().await {
            break idx;
        }
        assert!(Instant::now() < deadline, "no survivor took leadership");
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    // A fresh election may still be settling; retry the write briefly.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match cluster.nodes[new_leader_idx].set("user3", "joker").await {
            Ok(()) => break,
            Err(_) if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(e) => panic!("write on the new leader kept failing: {}", e),
        }
    }

    for (i, node) in cluster.nodes.iter().enumerate() {
        assert!(
            common::wait_for_value(node, "user3", "joker", 5000).await,
            "survivor {} should converge after failover",
            i
        );
    }

    cluster.shutdown().await;
}

/// A member that once joined a multi-node cluster must not bootstrap a
/// fresh one-member cluster on restart, even with `enable_single` set.
#[tokio::test]
async fn rejoined_member_does_not_rebootstrap() {
    let mut cluster = TestCluster::new(2).await;
    cluster.wait_for_leader(3000).await.expect("leader elected");
    cluster.join_all().await;

    cluster.nodes[0].set("k", "v").await.expect("set");
    assert!(common::wait_for_value(&cluster.nodes[1], "k", "v", 3000).await);

    // Restart the follower with enable_single set.
    let addr = cluster.raft_addrs[1].clone();
    let mut follower = cluster.nodes.remove(1);
    follower.shutdown().await.expect("shutdown follower");
    drop(follower);

    // Let the old transport listener wind down before rebinding the port.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let config = common::test_config(2, &addr, cluster.temp_dirs[1].path());
    let reopened = raftkv::Store::open(config, true).await.expect("reopen");

    tokio::time::sleep(Duration::from_millis(1000)).await;

    // Still a two-member cluster; the restart must not have collapsed it.
    let voters: Vec<NodeId> = reopened.metrics().membership_config.voter_ids().collect();
    assert_eq!(voters.len(), 2, "membership must survive the restart");
    assert!(
        !reopened.is_leader().await || cluster.nodes[0].current_leader().await == Some(2),
        "the restarted follower must not lead a cluster of its own"
    );

    cluster.shutdown().await;
    drop(reopened);
}
