//! Connection pool reuse and replacement of stale handles.


use std::sync::Arc;
use std::time::Duration;

use fleetsched::cluster::Node;
use fleetsched::remote::ConnectionPool;
use fleetsched::scheduler::{Job, JobStatus};
use test_harness::{FakeCluster, TestScheduler};

fn pool() -> (ConnectionPool, FakeCluster) {
    let cluster = FakeCluster::new();
    (ConnectionPool::new(Arc::new(cluster.clone())), cluster)
}

#[tokio::test]
async fn test_handle_reused_while_active() {
    let (pool, cluster) = pool();
    let node = Node::new("node-1", "10.0.0.1");

    pool.get_connection(&node).await.unwrap();
    pool.get_connection(&node).await.unwrap();

    assert_eq!(cluster.handles_created(), 1);
    assert_eq!(pool.len().await, 1);
}

#[tokio::test]
async fn test_one_handle_per_node() {
    let (pool, cluster) = pool();

    pool.get_connection(&Node::new("node-1", "10.0.0.1")).await.unwrap();
    pool.get_connection(&Node::new("node-2", "10.0.0.2")).await.unwrap();

    assert_eq!(cluster.handles_created(), 2);
    assert_eq!(pool.len().await, 2);
}

#[tokio::test]
async fn test_inactive_handle_is_replaced() {
    let (pool, cluster) = pool();
    let node = Node::new("node-1", "10.0.0.1");

    let first = pool.get_connection(&node).await.unwrap();
    cluster.disconnect("node-1");
    assert!(!first.is_active());

    let second = pool.get_connection(&node).await.unwrap();
    assert!(second.is_active());
    assert_eq!(cluster.handles_created(), 2);
    assert_eq!(pool.len().await, 1);
}

#[tokio::test]
async fn test_evict() {
    let (pool, _cluster) = pool();
    let node = Node::new("node-1", "10.0.0.1");

    pool.get_connection(&node).await.unwrap();
    assert!(pool.evict("node-1").await);
    assert!(!pool.evict("node-1").await);
    assert!(pool.is_empty().await);
}

#[tokio::test]
async fn test_scheduler_reuses_connection_across_jobs() {
    let ts = TestScheduler::with_nodes(1);

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(ts.submit(Job::new(format!("job-{}", i), "true")).await.id);
    }
    ts.scheduler.start();
    assert!(ts.wait_all_terminal().await);

    for id in ids {
        assert_eq!(
            ts.scheduler.get(&id).await.unwrap().status,
            JobStatus::Completed
        );
    }
    assert_eq!(ts.cluster.handles_created(), 1);
    assert_eq!(ts.scheduler.pool().len().await, 1);

    // A dead channel is rebuilt on the next dispatch
    ts.cluster.disconnect("node-1");
    let late = ts.submit(Job::new("late", "true")).await;
    ts.wait_for_status(late.id, JobStatus::Completed).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ts.cluster.handles_created(), 2);
    ts.scheduler.stop().await;
}
