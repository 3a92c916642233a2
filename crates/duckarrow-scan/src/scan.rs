//! Table scan lifecycle
//!
//! An explicit state machine per scan: Bound -> Initialized -> Done ->
//! Freed. Illegal transitions are errors, not undefined behavior. A scan
//! owns exactly one connection for its lifetime and is driven by one
//! host worker at a time.

use crate::chunk::{DataChunk, VECTOR_SIZE};
use crate::convert::convert_column;
use arrow::array::RecordBatch;
use dashmap::DashMap;
use duckarrow_common::sql::{build_projected_query, build_schema_query};
use duckarrow_common::validation::validate_table_name;
use duckarrow_common::{
    ColumnDescriptor, ConnectionConfig, DuckArrowError, LogicalType, Result,
};
use duckarrow_flight::{ConnectionResult, Pool, QueryReader, Statement};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Teardown must finish promptly even when a stream is mid-flight;
/// dropping the reader aborts the gRPC stream, and the close RPC gets a
/// bounded wait.
const STATEMENT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Bound,
    Initialized,
    Done,
    Freed,
}

#[derive(Debug)]
pub struct TableScan {
    state: ScanState,
    pool: Arc<Pool>,
    config: ConnectionConfig,
    conn: Option<ConnectionResult>,
    schema_name: Option<String>,
    table_name: String,
    columns: Vec<ColumnDescriptor>,
    projection: Vec<usize>,
    statement: Option<Statement>,
    reader: Option<QueryReader>,
    batch: Option<RecordBatch>,
    cursor: usize,
}

impl TableScan {
    /// Obtain a connection, probe the table's schema, and capture the
    /// ordered column descriptors. The probe statement is closed before
    /// returning; errors hand the connection back first.
    pub async fn bind(
        pool: Arc<Pool>,
        config: ConnectionConfig,
        schema: Option<&str>,
        table: &str,
    ) -> Result<TableScan> {
        validate_table_name(table)?;

        let conn = pool.get(&config).await?;
        let probe = build_schema_query(schema, table);
        tracing::debug!(table, %probe, "binding table scan");

        match Self::probe_columns(&conn, &probe).await {
            Ok(columns) => Ok(TableScan {
                state: ScanState::Bound,
                pool,
                config,
                conn: Some(conn),
                schema_name: schema.map(str::to_string),
                table_name: table.to_string(),
                columns,
                projection: Vec::new(),
                statement: None,
                reader: None,
                batch: None,
                cursor: 0,
            }),
            Err(e) => {
                pool.release_or_close(&config, &conn);
                Err(e)
            }
        }
    }

    async fn probe_columns(conn: &ConnectionResult, probe: &str) -> Result<Vec<ColumnDescriptor>> {
        let (statement, mut reader) = conn.client.query(probe).await?;

        // Metadata only. Drain so servers that omit the schema from the
        // flight info still surface it through the stream.
        let schema = if let Some(schema) = reader.schema() {
            Ok(Some(schema))
        } else {
            let mut drained = Ok(());
            loop {
                match reader.next_batch().await {
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        drained = Err(e);
                        break;
                    }
                }
            }
            drained.map(|_| reader.schema())
        };

        drop(reader);
        close_statement(statement).await;

        let schema = schema?.ok_or_else(|| {
            DuckArrowError::Remote("schema query returned no schema".to_string())
        })?;
        Ok(schema
            .fields()
            .iter()
            .map(|field| ColumnDescriptor {
                name: field.name().clone(),
                logical_type: LogicalType::from_arrow(field.data_type()),
            })
            .collect())
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Result<&ColumnDescriptor> {
        self.columns.get(index).ok_or_else(|| {
            DuckArrowError::InvalidArgument(format!("column index {index} out of range"))
        })
    }

    /// Columns in output order: the projection when one is set, the full
    /// bound set otherwise.
    pub fn output_columns(&self) -> Vec<ColumnDescriptor> {
        if self.projection.is_empty() {
            self.columns.clone()
        } else {
            self.projection
                .iter()
                .filter_map(|&i| self.columns.get(i).cloned())
                .collect()
        }
    }

    pub fn output_types(&self) -> Vec<LogicalType> {
        self.output_columns()
            .into_iter()
            .map(|c| c.logical_type)
            .collect()
    }

    /// Record the projection and start the remote stream.
    pub async fn init(&mut self, projection: &[usize]) -> Result<()> {
        match self.state {
            ScanState::Bound => {}
            ScanState::Initialized | ScanState::Done => {
                return Err(DuckArrowError::InvalidArgument(
                    "scan is already initialized".to_string(),
                ))
            }
            ScanState::Freed => {
                return Err(DuckArrowError::InvalidArgument("scan is freed".to_string()))
            }
        }
        if let Some(&bad) = projection.iter().find(|&&i| i >= self.columns.len()) {
            return Err(DuckArrowError::InvalidArgument(format!(
                "projected column index {bad} out of range"
            )));
        }

        self.projection = projection.to_vec();
        let names: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        let sql = build_projected_query(
            self.schema_name.as_deref(),
            &self.table_name,
            &names,
            projection,
        );
        tracing::debug!(%sql, "initializing table scan");

        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| DuckArrowError::Transport("scan connection is gone".to_string()))?;
        let (statement, reader) = conn.client.query(&sql).await?;
        self.statement = Some(statement);
        self.reader = Some(reader);
        self.state = ScanState::Initialized;
        Ok(())
    }

    /// Emit the next chunk. Returns the number of rows written; 0 means
    /// the stream is exhausted.
    pub async fn next(&mut self, chunk: &mut DataChunk) -> Result<usize> {
        match self.state {
            ScanState::Initialized => {}
            ScanState::Done => {
                chunk.reset();
                chunk.set_cardinality(0);
                return Ok(0);
            }
            ScanState::Bound => {
                return Err(DuckArrowError::InvalidArgument(
                    "scan is not initialized".to_string(),
                ))
            }
            ScanState::Freed => {
                return Err(DuckArrowError::InvalidArgument("scan is freed".to_string()))
            }
        }

        // Refill: the retained batch is dropped before the next one is
        // fetched; empty batches are skipped.
        loop {
            let exhausted = match &self.batch {
                Some(batch) => self.cursor >= batch.num_rows(),
                None => true,
            };
            if !exhausted {
                break;
            }
            self.batch = None;

            let reader = self
                .reader
                .as_mut()
                .ok_or_else(|| DuckArrowError::Transport("scan reader is gone".to_string()))?;
            match reader.next_batch().await? {
                Some(batch) if batch.num_rows() == 0 => continue,
                Some(batch) => {
                    self.batch = Some(batch);
                    self.cursor = 0;
                }
                None => {
                    self.state = ScanState::Done;
                    chunk.reset();
                    chunk.set_cardinality(0);
                    return Ok(0);
                }
            }
        }

        let Some(batch) = self.batch.clone() else {
            chunk.reset();
            chunk.set_cardinality(0);
            return Ok(0);
        };
        if batch.num_columns() != chunk.column_count() {
            return Err(DuckArrowError::Remote(format!(
                "remote returned {} columns, output chunk expects {}",
                batch.num_columns(),
                chunk.column_count()
            )));
        }

        let rows = (batch.num_rows() - self.cursor)
            .min(chunk.capacity())
            .min(VECTOR_SIZE);
        chunk.reset();
        for (index, column) in batch.columns().iter().enumerate() {
            convert_column(column.as_ref(), chunk.vector_mut(index), self.cursor, rows)?;
        }
        self.cursor += rows;
        chunk.set_cardinality(rows);
        Ok(rows)
    }

    /// Release batch, reader, and statement in that order, then hand the
    /// connection back. Idempotent.
    pub async fn free(&mut self) {
        if self.state == ScanState::Freed {
            return;
        }
        self.batch = None;
        self.reader = None;
        if let Some(statement) = self.statement.take() {
            close_statement(statement).await;
        }
        if let Some(conn) = self.conn.take() {
            self.pool.release_or_close(&self.config, &conn);
        }
        self.state = ScanState::Freed;
        tracing::debug!(table = %self.table_name, "freed table scan");
    }
}

async fn close_statement(statement: Statement) {
    match tokio::time::timeout(STATEMENT_CLOSE_TIMEOUT, statement.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "closing scan statement"),
        Err(_) => tracing::warn!("closing scan statement timed out"),
    }
}

/// Process-wide table of opaque scan handles. The host never sees a
/// pointer, only a stable integer id.
pub struct ScanRegistry {
    scans: DashMap<u64, Arc<Mutex<TableScan>>>,
    next_handle: AtomicU64,
}

impl Default for ScanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self {
            scans: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Bind a scan and register it. Returns the opaque handle and the
    /// bound column count.
    pub async fn bind(
        &self,
        pool: Arc<Pool>,
        config: ConnectionConfig,
        schema: Option<&str>,
        table: &str,
    ) -> Result<(u64, usize)> {
        let scan = TableScan::bind(pool, config, schema, table).await?;
        let column_count = scan.column_count();
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.scans.insert(handle, Arc::new(Mutex::new(scan)));
        tracing::debug!(handle, column_count, "registered table scan");
        Ok((handle, column_count))
    }

    fn scan(&self, handle: u64) -> Result<Arc<Mutex<TableScan>>> {
        self.scans
            .get(&handle)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                DuckArrowError::InvalidArgument(format!("unknown scan handle: {handle}"))
            })
    }

    pub async fn column(&self, handle: u64, index: usize) -> Result<ColumnDescriptor> {
        let scan = self.scan(handle)?;
        let scan = scan.lock().await;
        scan.column(index).cloned()
    }

    pub async fn output_types(&self, handle: u64) -> Result<Vec<LogicalType>> {
        let scan = self.scan(handle)?;
        let scan = scan.lock().await;
        Ok(scan.output_types())
    }

    pub async fn init(&self, handle: u64, projection: &[usize]) -> Result<()> {
        let scan = self.scan(handle)?;
        let mut scan = scan.lock().await;
        scan.init(projection).await
    }

    pub async fn next(&self, handle: u64, chunk: &mut DataChunk) -> Result<usize> {
        let scan = self.scan(handle)?;
        let mut scan = scan.lock().await;
        scan.next(chunk).await
    }

    /// Tear down and forget a scan.
    pub async fn free(&self, handle: u64) -> Result<()> {
        let (_, scan) = self.scans.remove(&handle).ok_or_else(|| {
            DuckArrowError::InvalidArgument(format!("unknown scan handle: {handle}"))
        })?;
        let mut scan = scan.lock().await;
        scan.free().await;
        Ok(())
    }

    /// Free every registered scan, for process teardown.
    pub async fn close(&self) {
        let handles: Vec<u64> = self.scans.iter().map(|entry| *entry.key()).collect();
        for handle in handles {
            if let Some((_, scan)) = self.scans.remove(&handle) {
                let mut scan = scan.lock().await;
                scan.free().await;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }
}
