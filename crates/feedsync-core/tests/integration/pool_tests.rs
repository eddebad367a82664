//! Integration tests for the channel pool under concurrent use.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::integration::common::{MemoryConnector, endpoint, feed_config, indexer, item};
use feedsync_core::{ChannelPool, PoolState, TransferChannel};

#[test]
fn test_concurrent_borrowers_never_exceed_capacity() {
    // Arrange
    let connector = MemoryConnector::default();
    let pool = ChannelPool::new(connector.clone(), Duration::from_secs(1), Duration::from_secs(5));
    let endpoint = endpoint("incoming");
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    // Act
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let endpoint = endpoint.clone();
            let in_use = Arc::clone(&in_use);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0..5 {
                    let channel = pool.borrow(&endpoint).unwrap();
                    assert!(channel.is_connected());
                    let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    in_use.fetch_sub(1, Ordering::SeqCst);
                    pool.return_channel(channel);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Assert
    assert!(peak.load(Ordering::SeqCst) <= endpoint.max_connections);
    assert_eq!(connector.sessions(), 1);
    assert!(connector.channels_opened() <= endpoint.max_connections);
    assert_eq!(pool.stats().active, 0);
}

#[test]
fn test_borrow_reconnects_dropped_idle_channel() {
    let connector = MemoryConnector::default();
    let pool = ChannelPool::new(connector.clone(), Duration::from_secs(1), Duration::from_secs(1));
    let endpoint = endpoint("incoming");

    let channel = pool.borrow(&endpoint).unwrap();
    pool.return_channel(channel);
    connector.sever();

    let channel = pool.borrow(&endpoint).unwrap();
    assert!(channel.is_connected());
    assert_eq!(connector.channels_opened(), 1, "idle channel should be reconnected, not replaced");
}

#[test]
fn test_close_all_then_borrow_reopens() {
    let connector = MemoryConnector::default();
    let pool = ChannelPool::new(connector.clone(), Duration::from_secs(1), Duration::from_secs(1));
    let endpoint = endpoint("incoming");

    pool.return_channel(pool.borrow(&endpoint).unwrap());
    pool.close_all();
    assert_eq!(pool.stats().state, PoolState::Closed);
    assert_eq!(pool.stats().idle, 0);

    let channel = pool.borrow(&endpoint).unwrap();
    assert!(channel.is_connected());
    assert_eq!(pool.stats().state, PoolState::Open);
    assert_eq!(connector.sessions(), 2);
}

#[tokio::test]
async fn test_failed_upload_invalidates_channel() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let config = feed_config("products", dir.path(), 10, 0);
    let connector = MemoryConnector::default();
    let indexer = indexer(connector.clone());
    let path = dir.path().join("feed_1_1.csv");
    indexer.generate_data_feed(&[item(1)], &config.plan, &path).unwrap();
    connector.fail_next(1);

    // Act
    let first = indexer.upload_data_feed(&path, &config.endpoint).await;
    let second = indexer.upload_data_feed(&path, &config.endpoint).await;

    // Assert
    assert!(first.is_err());
    assert!(second.is_ok());
    assert_eq!(connector.channels_opened(), 2, "failed channel must not be reused");
    assert_eq!(indexer.pool().stats().idle, 1);
}
