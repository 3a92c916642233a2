//! Pool behavior against a live in-process server.

use arrow::array::{Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use duckarrow_common::ConnectionConfig;
use duckarrow_flight::testing::TestFlightSqlServer;
use duckarrow_flight::Pool;
use std::sync::Arc;
use std::time::Duration;

fn simple_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
    RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![1, 2]))])
        .expect("simple batch")
}

#[tokio::test]
async fn sequential_gets_reuse_the_pooled_entry() {
    let server = TestFlightSqlServer::new()
        .with_table("", "t", simple_batch())
        .spawn()
        .await;
    let config = ConnectionConfig::new(server.uri());
    let pool = Pool::new();

    let first = pool.get(&config).await.expect("first get");
    assert!(first.pooled);
    let first_client = first.client.clone();
    pool.release(&config);

    let second = pool.get(&config).await.expect("second get");
    assert!(second.pooled);
    assert!(
        Arc::ptr_eq(&first_client, &second.client),
        "second get must reuse the same client"
    );
    assert_eq!(pool.len(), 1);

    pool.release(&config);
    pool.close();
}

#[tokio::test]
async fn contended_get_returns_unmanaged_connection() {
    let server = TestFlightSqlServer::new()
        .with_table("", "t", simple_batch())
        .spawn()
        .await;
    let config = ConnectionConfig::new(server.uri());
    let pool = Pool::new();

    let held = pool.get(&config).await.expect("first get");
    assert!(held.pooled);

    // The entry is in use; the second caller must not wait for it.
    let contended = pool.get(&config).await.expect("second get");
    assert!(!contended.pooled);
    assert!(!Arc::ptr_eq(&held.client, &contended.client));
    assert_eq!(pool.len(), 1);

    pool.release_or_close(&config, &contended);
    assert!(!contended.client.is_healthy());

    pool.release_or_close(&config, &held);
    assert!(held.client.is_healthy());
    pool.close();
}

#[tokio::test]
async fn stale_entry_is_evicted_and_replaced() {
    let server = TestFlightSqlServer::new()
        .with_table("", "t", simple_batch())
        .spawn()
        .await;
    let config = ConnectionConfig::new(server.uri());
    let pool = Pool::with_max_idle(Duration::from_millis(10));

    let first = pool.get(&config).await.expect("first get");
    let first_client = first.client.clone();
    pool.release(&config);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = pool.get(&config).await.expect("second get");
    assert!(second.pooled);
    assert!(
        !Arc::ptr_eq(&first_client, &second.client),
        "stale entry must be replaced"
    );
    // The evicted client was closed by the pool.
    assert!(!first_client.is_healthy());

    pool.release(&config);
    pool.close();
}

#[tokio::test]
async fn closed_entry_is_replaced_on_next_get() {
    let server = TestFlightSqlServer::new()
        .with_table("", "t", simple_batch())
        .spawn()
        .await;
    let config = ConnectionConfig::new(server.uri());
    let pool = Pool::new();

    let first = pool.get(&config).await.expect("first get");
    let first_client = first.client.clone();
    pool.release(&config);

    // Simulate a dead connection: the health check fails on next get.
    first_client.close();

    let second = pool.get(&config).await.expect("second get");
    assert!(second.pooled);
    assert!(!Arc::ptr_eq(&first_client, &second.client));

    pool.release(&config);
    pool.close();
}

#[tokio::test]
async fn different_configs_get_distinct_entries() {
    let server = TestFlightSqlServer::new()
        .with_table("", "t", simple_batch())
        .spawn()
        .await;
    let pool = Pool::new();

    let plain = ConnectionConfig::new(server.uri());
    let with_user = ConnectionConfig {
        username: "user".to_string(),
        password: "pass".to_string(),
        ..ConnectionConfig::new(server.uri())
    };

    let a = pool.get(&plain).await.expect("get plain");
    let b = pool.get(&with_user).await.expect("get with user");
    assert!(a.pooled);
    assert!(b.pooled);
    assert!(!Arc::ptr_eq(&a.client, &b.client));
    assert_eq!(pool.len(), 2);

    pool.release(&plain);
    pool.release(&with_user);
    pool.close();
    assert!(pool.is_empty());
}

#[tokio::test]
async fn close_shuts_down_pooled_clients() {
    let server = TestFlightSqlServer::new()
        .with_table("", "t", simple_batch())
        .spawn()
        .await;
    let config = ConnectionConfig::new(server.uri());
    let pool = Pool::new();

    let conn = pool.get(&config).await.expect("get");
    pool.release(&config);
    pool.close();

    assert!(pool.is_empty());
    assert!(!conn.client.is_healthy());
}
