//! Facade tests: scalar functions, the rewriter, and the full
//! virtual-schema query path against the in-process server.

use arrow::array::{Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use duckarrow::{
    AttachOptions, DataChunk, DuckArrow, DuckArrowError, OnEntryNotFound, TABLE_FUNCTION,
};
use duckarrow_flight::testing::TestFlightSqlServer;
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

#[test]
fn configure_rejects_invalid_uri_with_function_prefix() {
    let ext = DuckArrow::new();
    let err = ext
        .configure(Some("http://x"), "", "", None)
        .expect_err("bad scheme");
    assert_eq!(
        err.to_string(),
        "remote_configure: URI must start with grpc:// or grpc+tls://"
    );
    // Nothing was stored.
    assert!(ext.global_config().snapshot().is_none());
}

#[test]
fn configure_null_uri_is_null_and_keeps_state() {
    let ext = DuckArrow::new();
    ext.configure(Some("grpc://h:1"), "u", "p", None)
        .expect("configure");
    let before = ext.global_config().snapshot().expect("snapshot");

    let result = ext.configure(None, "x", "y", Some(true)).expect("null uri");
    assert!(result.is_none());
    let after = ext.global_config().snapshot().expect("snapshot");
    assert_eq!(*before, *after);
}

#[test]
fn configure_stores_snapshot_and_reports_success() {
    let ext = DuckArrow::new();
    let message = ext
        .configure(Some("grpc+tls://h:31337"), "u", "p", Some(true))
        .expect("configure")
        .expect("message");
    assert_eq!(message, "DuckArrow configured successfully");

    let snapshot = ext.global_config().snapshot().expect("snapshot");
    assert_eq!(snapshot.uri, "grpc+tls://h:31337");
    assert_eq!(snapshot.username, "u");
    assert_eq!(snapshot.password, "p");
    assert!(snapshot.skip_verify);
}

#[test]
fn configure_empty_credentials_fall_back_to_environment() {
    let ext = DuckArrow::new();

    std::env::set_var(duckarrow::ENV_USERNAME, "env-user");
    std::env::set_var(duckarrow::ENV_PASSWORD, "env-pass");
    ext.configure(Some("grpc://h:1"), "", "", None)
        .expect("configure");
    let snapshot = ext.global_config().snapshot().expect("snapshot");
    assert_eq!(snapshot.username, "env-user");
    assert_eq!(snapshot.password, "env-pass");

    // Explicit parameters win over the environment.
    ext.configure(Some("grpc://h:1"), "param-user", "param-pass", None)
        .expect("configure");
    let snapshot = ext.global_config().snapshot().expect("snapshot");
    assert_eq!(snapshot.username, "param-user");
    assert_eq!(snapshot.password, "param-pass");

    std::env::remove_var(duckarrow::ENV_USERNAME);
    std::env::remove_var(duckarrow::ENV_PASSWORD);
}

#[test]
fn version_defaults_to_dev() {
    let ext = DuckArrow::new();
    assert_eq!(ext.version(), "dev");
}

#[tokio::test]
async fn execute_validates_input_before_any_remote_call() {
    init_tracing();
    let ext = DuckArrow::new();

    assert!(ext.execute(None).await.expect("null sql").is_none());

    let err = ext.execute(Some("")).await.expect_err("empty sql");
    assert_eq!(err.to_string(), "remote_execute: SQL statement cannot be empty");

    let big = "x".repeat(1024 * 1024 + 1);
    let err = ext.execute(Some(&big)).await.expect_err("oversize sql");
    assert_eq!(
        err.to_string(),
        "remote_execute: SQL statement exceeds maximum length (1MB)"
    );

    let err = ext.execute(Some("DROP\0TABLE")).await.expect_err("nul byte");
    assert_eq!(
        err.to_string(),
        "remote_execute: SQL statement contains invalid null byte"
    );

    let err = ext.execute(Some("DROP TABLE t")).await.expect_err("unconfigured");
    assert_eq!(
        err.to_string(),
        "remote_execute: not configured - call remote_configure() first"
    );
}

#[tokio::test]
async fn execute_passes_through_affected_rows_and_errors() {
    init_tracing();
    let server = TestFlightSqlServer::new()
        .with_affected_rows(7)
        .spawn()
        .await;
    let ext = DuckArrow::new();
    ext.configure(Some(&server.uri()), "", "", None)
        .expect("configure");

    let affected = ext
        .execute(Some(r#"DROP TABLE "t""#))
        .await
        .expect("execute");
    assert_eq!(affected, Some(7));
    assert!(server
        .executed_sql()
        .contains(&r#"DROP TABLE "t""#.to_string()));

    // The borrowed connection went back to the pool.
    assert_eq!(ext.pool().len(), 1);

    let failing = TestFlightSqlServer::new()
        .with_execute_error("relation \"t\" does not exist")
        .spawn()
        .await;
    ext.configure(Some(&failing.uri()), "", "", None)
        .expect("configure");
    let err = ext
        .execute(Some(r#"DROP TABLE "t""#))
        .await
        .expect_err("remote failure");
    let message = err.to_string();
    assert!(message.starts_with("remote_execute: "), "{message}");
    assert!(message.contains("relation \"t\" does not exist"), "{message}");

    ext.close().await;
}

#[test]
fn replacement_scan_declines_when_unconfigured() {
    let ext = DuckArrow::new();
    assert!(ext.replacement_scan("Order").expect("scan").is_none());
}

#[test]
fn replacement_scan_rewrites_to_remote_query() {
    let ext = DuckArrow::new();
    ext.configure(Some("grpc+tls://h:31337"), "", "", None)
        .expect("configure");

    let scan = ext
        .replacement_scan("Order")
        .expect("scan")
        .expect("intercepted");
    assert_eq!(scan.function_name, TABLE_FUNCTION);
    assert_eq!(
        scan.parameters,
        vec![
            "grpc+tls://h:31337".to_string(),
            r#"SELECT * FROM "Order""#.to_string()
        ]
    );
}

#[test]
fn replacement_scan_strips_exactly_one_quote_pair() {
    let ext = DuckArrow::new();
    ext.configure(Some("grpc://h:1"), "", "", None)
        .expect("configure");

    // "My""Table" quoted once: the stripped name keeps its inner quote.
    let scan = ext
        .replacement_scan("\"My\"\"Table\"")
        .expect("scan")
        .expect("intercepted");
    assert_eq!(scan.parameters[1], r#"SELECT * FROM "My""""Table""#);

    // A doubly quoted name loses only the outer pair; the remaining
    // quotes are escaped by doubling.
    let scan = ext
        .replacement_scan("\"\"table\"\"")
        .expect("scan")
        .expect("intercepted");
    assert_eq!(
        scan.parameters[1],
        "SELECT * FROM \"\"\"table\"\"\""
    );
}

#[test]
fn replacement_scan_skips_host_internal_tables() {
    let ext = DuckArrow::new();
    ext.configure(Some("grpc://h:1"), "", "", None)
        .expect("configure");

    for name in [
        "pg_catalog",
        "sqlite_master",
        "information_schema",
        "__internal",
        "mdclientcache_orders",
    ] {
        assert!(
            ext.replacement_scan(name).expect("scan").is_none(),
            "{name}"
        );
    }
}

#[test]
fn replacement_scan_rejects_injection_before_any_remote_call() {
    let ext = DuckArrow::new();
    ext.configure(Some("grpc://h:1"), "", "", None)
        .expect("configure");

    let err = ext
        .replacement_scan("Order;DROP TABLE users")
        .expect_err("injection attempt");
    assert_eq!(
        err.to_string(),
        "duckarrow: table name contains invalid characters"
    );
}

#[tokio::test]
async fn virtual_schema_query_runs_end_to_end() -> anyhow::Result<()> {
    init_tracing();
    let server = TestFlightSqlServer::new()
        .with_table("", "Order", orders_batch())
        .spawn()
        .await;
    let ext = DuckArrow::new();
    ext.configure(Some(&server.uri()), "", "", None)?;

    // Host side: unknown table "Order" in the duckarrow schema.
    let scan = ext
        .replacement_scan("Order")?
        .ok_or_else(|| anyhow::anyhow!("reference was not intercepted"))?;

    // The substituted remote_query(uri, sql) invocation binds a scan.
    let (handle, column_count) = ext
        .bind_remote_query(&scan.parameters[0], &scan.parameters[1])
        .await?;
    assert_eq!(column_count, 3);
    let column = ext.scan_column(handle, 1).await?;
    assert_eq!(column.name, "name");

    ext.scan_init(handle, &[0, 2]).await?;
    assert!(server
        .executed_sql()
        .contains(&r#"SELECT "id", "status" FROM "Order""#.to_string()));

    let types = ext.scan_output_types(handle).await?;
    let mut chunk = DataChunk::new(&types);
    let rows = ext.scan_next(handle, &mut chunk).await?;
    assert_eq!(rows, 3);
    assert_eq!(chunk.vector(0).i64_value(0), Some(1));
    assert_eq!(chunk.vector(1).str_value(2), Some("done"));
    assert_eq!(ext.scan_next(handle, &mut chunk).await?, 0);

    ext.scan_free(handle).await?;
    assert_eq!(server.open_statements(), 0);
    ext.close().await;
    Ok(())
}

#[tokio::test]
async fn bind_remote_query_rejects_arbitrary_sql() {
    init_tracing();
    let ext = DuckArrow::new();
    let err = ext
        .bind_remote_query("grpc://h:1", "INSERT INTO t VALUES (1)")
        .await
        .expect_err("not a single-table select");
    assert!(matches!(err, DuckArrowError::InvalidArgument(_)), "{err:?}");
}

#[tokio::test]
async fn attach_detach_through_the_facade() {
    init_tracing();
    let server = TestFlightSqlServer::new()
        .with_table("sales", "Order", orders_batch())
        .spawn()
        .await;
    let ext = DuckArrow::new();

    let catalog = ext
        .attach("remote", &server.uri(), AttachOptions::default())
        .await
        .expect("attach");
    assert!(ext.catalog("remote").is_some());

    let err = ext
        .attach("remote", &server.uri(), AttachOptions::default())
        .await
        .expect_err("duplicate attach");
    assert!(err.message().contains("already attached"), "{err}");

    let table = catalog
        .lookup_schema("sales")
        .lookup_table("Order", OnEntryNotFound::Error)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(table.columns().len(), 3);

    ext.detach("remote").expect("detach");
    assert!(ext.catalog("remote").is_none());
    let err = ext.detach("remote").expect_err("double detach");
    assert!(matches!(err, DuckArrowError::NotFound(_)), "{err:?}");
    ext.close().await;
}
