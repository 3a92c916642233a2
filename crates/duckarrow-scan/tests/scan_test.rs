//! Scan lifecycle tests against the in-process Flight SQL server.

use arrow::array::{Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use duckarrow_common::{ConnectionConfig, DuckArrowError, LogicalType};
use duckarrow_flight::testing::TestFlightSqlServer;
use duckarrow_flight::Pool;
use duckarrow_scan::{DataChunk, ScanRegistry, TableScan, VECTOR_SIZE};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("info")
        .try_init();
}

fn orders_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
        Field::new("status", DataType::Utf8, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3])),
            Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            Arc::new(StringArray::from(vec!["new", "open", "done"])),
        ],
    )
    .expect("orders batch")
}

fn wide_batch(rows: usize) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
    let values: Vec<i64> = (0..rows as i64).collect();
    RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).expect("wide batch")
}

#[tokio::test]
async fn projected_scan_pushes_exact_sql_and_converts() -> anyhow::Result<()> {
    init_tracing();
    let server = TestFlightSqlServer::new()
        .with_table("", "Order", orders_batch())
        .spawn()
        .await;
    let pool = Arc::new(Pool::new());
    let config = ConnectionConfig::new(server.uri());

    let mut scan = TableScan::bind(pool.clone(), config.clone(), None, "Order").await?;
    assert_eq!(scan.column_count(), 3);
    assert_eq!(scan.column(0)?.name, "id");
    assert_eq!(scan.column(0)?.logical_type, LogicalType::BigInt);
    assert_eq!(scan.column(2)?.name, "status");

    scan.init(&[0, 2]).await?;
    assert!(server
        .executed_sql()
        .contains(&r#"SELECT "id", "status" FROM "Order""#.to_string()));

    let mut chunk = DataChunk::new(&scan.output_types());
    let rows = scan.next(&mut chunk).await?;
    assert_eq!(rows, 3);
    assert_eq!(chunk.cardinality(), 3);
    assert_eq!(chunk.column_count(), 2);
    assert_eq!(chunk.vector(0).i64_value(0), Some(1));
    assert_eq!(chunk.vector(1).str_value(0), Some("new"));
    assert_eq!(chunk.vector(1).str_value(2), Some("done"));

    // Exhausted stream transitions to Done and stays there.
    assert_eq!(scan.next(&mut chunk).await?, 0);
    assert_eq!(scan.next(&mut chunk).await?, 0);

    scan.free().await;
    assert_eq!(server.open_statements(), 0);
    Ok(())
}

#[tokio::test]
async fn quoted_table_and_column_identifiers() {
    init_tracing();
    let schema = Arc::new(Schema::new(vec![Field::new("col1", DataType::Int64, false)]));
    let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![7]))])
        .expect("quoted batch");
    let server = TestFlightSqlServer::new()
        .with_table("", "My\"Table", batch)
        .spawn()
        .await;
    let pool = Arc::new(Pool::new());

    let mut scan = TableScan::bind(
        pool,
        ConnectionConfig::new(server.uri()),
        None,
        "My\"Table",
    )
    .await
    .expect("bind");
    scan.init(&[0]).await.expect("init");

    let log = server.executed_sql();
    assert!(log.contains(&r#"SELECT * FROM "My""Table" WHERE 1=0"#.to_string()));
    // The single-column projection covers the full set in identity
    // order, so the scan emits a star.
    assert!(log.contains(&r#"SELECT * FROM "My""Table""#.to_string()));

    let mut chunk = DataChunk::new(&scan.output_types());
    assert_eq!(scan.next(&mut chunk).await.expect("next"), 1);
    assert_eq!(chunk.vector(0).i64_value(0), Some(7));
    scan.free().await;
}

#[tokio::test]
async fn full_projection_in_different_order_stays_explicit() {
    init_tracing();
    let server = TestFlightSqlServer::new()
        .with_table("", "Order", orders_batch())
        .spawn()
        .await;
    let pool = Arc::new(Pool::new());

    let mut scan = TableScan::bind(pool, ConnectionConfig::new(server.uri()), None, "Order")
        .await
        .expect("bind");
    scan.init(&[2, 1, 0]).await.expect("init");

    assert!(server
        .executed_sql()
        .contains(&r#"SELECT "status", "name", "id" FROM "Order""#.to_string()));

    let mut chunk = DataChunk::new(&scan.output_types());
    let rows = scan.next(&mut chunk).await.expect("next");
    assert_eq!(rows, 3);
    // Columns arrive in the projected order.
    assert_eq!(chunk.vector(0).str_value(0), Some("new"));
    assert_eq!(chunk.vector(2).i64_value(0), Some(1));
    scan.free().await;
}

#[tokio::test]
async fn schema_qualified_scan() {
    init_tracing();
    let server = TestFlightSqlServer::new()
        .with_table("sales", "Order", orders_batch())
        .spawn()
        .await;
    let pool = Arc::new(Pool::new());

    let mut scan = TableScan::bind(
        pool,
        ConnectionConfig::new(server.uri()),
        Some("sales"),
        "Order",
    )
    .await
    .expect("bind");
    scan.init(&[0]).await.expect("init");

    assert!(server
        .executed_sql()
        .contains(&r#"SELECT "id" FROM "sales"."Order""#.to_string()));
    scan.free().await;
}

#[tokio::test]
async fn large_batches_are_capped_at_vector_size() {
    init_tracing();
    let server = TestFlightSqlServer::new()
        .with_table("", "big", wide_batch(5000))
        .spawn()
        .await;
    let pool = Arc::new(Pool::new());

    let mut scan = TableScan::bind(pool, ConnectionConfig::new(server.uri()), None, "big")
        .await
        .expect("bind");
    scan.init(&[]).await.expect("init");

    let mut chunk = DataChunk::new(&scan.output_types());
    let mut total = 0usize;
    let mut emitted = Vec::new();
    loop {
        let rows = scan.next(&mut chunk).await.expect("next");
        if rows == 0 {
            break;
        }
        assert!(rows <= VECTOR_SIZE);
        assert_eq!(chunk.cardinality(), rows);
        // Spot-check flow-control arithmetic: first value of each chunk
        // continues where the previous one stopped.
        assert_eq!(chunk.vector(0).i64_value(0), Some(total as i64));
        emitted.push(rows);
        total += rows;
    }

    assert_eq!(total, 5000);
    assert_eq!(emitted, vec![2048, 2048, 904]);
    scan.free().await;
}

#[tokio::test]
async fn empty_result_reaches_done_immediately() {
    init_tracing();
    let server = TestFlightSqlServer::new()
        .with_table("", "empty", wide_batch(0))
        .spawn()
        .await;
    let pool = Arc::new(Pool::new());

    let mut scan = TableScan::bind(pool, ConnectionConfig::new(server.uri()), None, "empty")
        .await
        .expect("bind");
    scan.init(&[]).await.expect("init");

    let mut chunk = DataChunk::new(&scan.output_types());
    assert_eq!(scan.next(&mut chunk).await.expect("next"), 0);
    assert_eq!(chunk.cardinality(), 0);
    scan.free().await;
}

#[tokio::test]
async fn next_before_init_is_an_explicit_error() {
    init_tracing();
    let server = TestFlightSqlServer::new()
        .with_table("", "Order", orders_batch())
        .spawn()
        .await;
    let pool = Arc::new(Pool::new());

    let mut scan = TableScan::bind(pool, ConnectionConfig::new(server.uri()), None, "Order")
        .await
        .expect("bind");

    let mut chunk = DataChunk::new(&scan.output_types());
    let err = scan.next(&mut chunk).await.expect_err("next before init");
    assert!(matches!(err, DuckArrowError::InvalidArgument(_)), "{err:?}");
    assert_eq!(err.message(), "scan is not initialized");

    let err = scan.init(&[99]).await.expect_err("bad projection");
    assert!(err.message().contains("out of range"), "{err}");

    scan.free().await;
}

#[tokio::test]
async fn bind_rejects_invalid_table_name_before_any_remote_call() {
    init_tracing();
    let server = TestFlightSqlServer::new().spawn().await;
    let pool = Arc::new(Pool::new());

    let err = TableScan::bind(
        pool,
        ConnectionConfig::new(server.uri()),
        None,
        "Order;DROP TABLE users",
    )
    .await
    .expect_err("injection attempt");
    assert_eq!(err.message(), "table name contains invalid characters");
    assert!(server.executed_sql().is_empty());
}

#[tokio::test]
async fn bind_failure_releases_the_connection() {
    init_tracing();
    let server = TestFlightSqlServer::new().spawn().await;
    let pool = Arc::new(Pool::new());
    let config = ConnectionConfig::new(server.uri());

    let err = TableScan::bind(pool.clone(), config.clone(), None, "missing")
        .await
        .expect_err("unknown table");
    assert!(matches!(err, DuckArrowError::Execute(_)), "{err:?}");

    // The connection went back to the pool: the next get reuses it.
    let conn = pool.get(&config).await.expect("get after failed bind");
    assert!(conn.pooled);
    pool.release(&config);
    pool.close();
}

#[tokio::test]
async fn scan_holds_its_connection_until_free() {
    init_tracing();
    let server = TestFlightSqlServer::new()
        .with_table("", "Order", orders_batch())
        .spawn()
        .await;
    let pool = Arc::new(Pool::new());
    let config = ConnectionConfig::new(server.uri());

    let mut scan = TableScan::bind(pool.clone(), config.clone(), None, "Order")
        .await
        .expect("bind");

    // While the scan holds the pooled entry, a concurrent borrower gets
    // an unmanaged connection.
    let concurrent = pool.get(&config).await.expect("concurrent get");
    assert!(!concurrent.pooled);
    pool.release_or_close(&config, &concurrent);

    scan.free().await;

    // After free, the pooled entry is available again.
    let after = pool.get(&config).await.expect("get after free");
    assert!(after.pooled);
    pool.release(&config);
    pool.close();
}

#[tokio::test]
async fn registry_round_trip_and_unknown_handles() {
    init_tracing();
    let server = TestFlightSqlServer::new()
        .with_table("", "Order", orders_batch())
        .spawn()
        .await;
    let pool = Arc::new(Pool::new());
    let registry = ScanRegistry::new();
    let config = ConnectionConfig::new(server.uri());

    let (handle, column_count) = registry
        .bind(pool.clone(), config.clone(), None, "Order")
        .await
        .expect("bind");
    assert_eq!(column_count, 3);

    let column = registry.column(handle, 1).await.expect("column");
    assert_eq!(column.name, "name");
    assert_eq!(column.logical_type, LogicalType::Varchar);

    registry.init(handle, &[1]).await.expect("init");
    let types = registry.output_types(handle).await.expect("output types");
    let mut chunk = DataChunk::new(&types);
    assert_eq!(registry.next(handle, &mut chunk).await.expect("next"), 3);
    assert_eq!(chunk.vector(0).str_value(1), None);

    registry.free(handle).await.expect("free");
    assert!(registry.is_empty());
    assert_eq!(server.open_statements(), 0);

    let err = registry.free(handle).await.expect_err("double free");
    assert!(err.message().contains("unknown scan handle"), "{err}");
    let err = registry
        .next(handle, &mut chunk)
        .await
        .expect_err("next after free");
    assert!(err.message().contains("unknown scan handle"), "{err}");
}

#[tokio::test]
async fn two_scans_on_the_same_table_are_independent() {
    init_tracing();
    let server = TestFlightSqlServer::new()
        .with_table("", "Order", orders_batch())
        .spawn()
        .await;
    let pool = Arc::new(Pool::new());
    let registry = ScanRegistry::new();
    let config = ConnectionConfig::new(server.uri());

    let (first, _) = registry
        .bind(pool.clone(), config.clone(), None, "Order")
        .await
        .expect("first bind");
    let (second, _) = registry
        .bind(pool.clone(), config.clone(), None, "Order")
        .await
        .expect("second bind");
    assert_ne!(first, second);

    registry.init(first, &[0]).await.expect("init first");
    registry.init(second, &[2]).await.expect("init second");

    let types = registry.output_types(first).await.expect("types");
    let mut chunk = DataChunk::new(&types);
    assert_eq!(registry.next(first, &mut chunk).await.expect("next"), 3);
    assert_eq!(chunk.vector(0).i64_value(2), Some(3));

    let types = registry.output_types(second).await.expect("types");
    let mut chunk = DataChunk::new(&types);
    assert_eq!(registry.next(second, &mut chunk).await.expect("next"), 3);
    assert_eq!(chunk.vector(0).str_value(1), Some("open"));

    registry.close().await;
    assert!(registry.is_empty());
}
