//! Integration tests for `RedisCounterStore` using testcontainers.
//!
//! # Requirements
//!
//! Docker must be running to execute these tests. The tests will automatically start a
//! `Redis` container using testcontainers.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

use boxoffice_core::{CheckoutId, CounterError, CounterStore, ReservationMetadata, TierId};
use boxoffice_redis::RedisCounterStore;
use chrono::{DateTime, Utc};
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;

/// Helper to start a Redis container and return a connected store.
///
/// # Panics
/// Panics if container setup fails (test environment issue).
async fn setup_counter_store() -> (ContainerAsync<Redis>, RedisCounterStore) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");

    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get redis port");

    let redis_url = format!("redis://127.0.0.1:{port}");

    let mut retries = 0;
    let max_retries = 30;
    loop {
        if let Ok(store) = RedisCounterStore::new(&redis_url).await {
            if store.ping().await.is_ok() {
                return (container, store);
            }
        }

        assert!(retries < max_retries, "Failed to connect after {max_retries} retries");
        retries += 1;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn tier(id: &str) -> TierId {
    TierId::parse(id).expect("valid tier id")
}

#[tokio::test]
async fn test_reserve_is_all_or_nothing() {
    let (_container, store) = setup_counter_store().await;
    let vip = tier("VIP");
    store.initialize(&vip, 5).await.expect("initialize");

    assert_eq!(store.reserve(&vip, 3).await.expect("reserve"), 2);

    let sold_out = store.reserve(&vip, 3).await;
    assert_eq!(
        sold_out,
        Err(CounterError::InsufficientInventory {
            tier: vip.clone(),
            requested: 3,
            available: 2,
        })
    );

    let all = store.get_all().await.expect("get_all");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].available, 2);
    assert_eq!(all[0].total_capacity, 5);
}

#[tokio::test]
async fn test_unknown_tier() {
    let (_container, store) = setup_counter_store().await;
    let ghost = tier("GHOST");

    assert_eq!(
        store.reserve(&ghost, 1).await,
        Err(CounterError::UnknownTier(ghost.clone()))
    );
    assert_eq!(
        store.release(&ghost, 1).await,
        Err(CounterError::UnknownTier(ghost.clone()))
    );
    assert_eq!(
        store.adjust(&ghost, 1).await,
        Err(CounterError::UnknownTier(ghost))
    );
}

#[tokio::test]
async fn test_release_is_clamped_to_total() {
    let (_container, store) = setup_counter_store().await;
    let ga = tier("GA");
    store.initialize(&ga, 10).await.expect("initialize");

    store.reserve(&ga, 4).await.expect("reserve");
    assert_eq!(store.release(&ga, 4).await.expect("release"), 10);
    assert_eq!(store.release(&ga, 4).await.expect("release"), 10);
}

#[tokio::test]
async fn test_adjust_floors_at_zero() {
    let (_container, store) = setup_counter_store().await;
    let ga = tier("GA");
    store.initialize(&ga, 10).await.expect("initialize");
    store.reserve(&ga, 6).await.expect("reserve");

    assert_eq!(store.adjust(&ga, 5).await.expect("grow"), 9);
    assert_eq!(store.adjust(&ga, -12).await.expect("shrink"), 0);

    let all = store.get_all().await.expect("get_all");
    assert_eq!(all[0].total_capacity, 3);
    assert_eq!(all[0].available, 0);
}

#[tokio::test]
async fn test_concurrent_reserves_never_oversell() {
    let (_container, store) = setup_counter_store().await;
    let ga = tier("GA");
    store.initialize(&ga, 50).await.expect("initialize");

    let attempts = (0..120).map(|_| {
        let store = store.clone();
        let ga = ga.clone();
        tokio::spawn(async move { store.reserve(&ga, 1).await })
    });

    let granted = futures::future::join_all(attempts)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();

    assert_eq!(granted, 50);
    let all = store.get_all().await.expect("get_all");
    assert_eq!(all[0].available, 0);
}

#[tokio::test]
async fn test_reservation_metadata_round_trip() {
    let (_container, store) = setup_counter_store().await;
    let checkout_id = CheckoutId::parse("co-meta").expect("valid checkout id");
    let reserved_at: DateTime<Utc> = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc);

    let metadata = ReservationMetadata {
        checkout_id: checkout_id.clone(),
        tier: tier("VIP"),
        quantity: 2,
        client_key: Some("10.0.0.1".to_string()),
        reserved_at,
        expires_at: reserved_at + chrono::Duration::minutes(15),
    };

    store
        .put_reservation(&metadata, Duration::from_secs(960))
        .await
        .expect("put");
    assert_eq!(
        store.get_reservation(&checkout_id).await.expect("get"),
        Some(metadata)
    );

    assert!(store.delete_reservation(&checkout_id).await.expect("delete"));
    assert!(!store.delete_reservation(&checkout_id).await.expect("delete"));
    assert_eq!(store.get_reservation(&checkout_id).await.expect("get"), None);
}
