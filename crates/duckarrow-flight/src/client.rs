//! Flight SQL client wrapper
//!
//! One authenticated session per client. RPC entry points clone the
//! underlying Flight SQL client (channel plus bearer token) per call, so
//! a shared client never serializes concurrent callers behind a lock.

use arrow::array::{Array, BinaryArray, Int16Array, Int32Array, Int64Array, LargeBinaryArray,
    RecordBatch, StringArray};
use arrow::datatypes::SchemaRef;
use arrow::ipc::convert::try_schema_from_ipc_buffer;
use arrow_flight::error::FlightError;
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::sql::client::{FlightSqlServiceClient, PreparedStatement};
use arrow_flight::sql::{CommandGetDbSchemas, CommandGetTables};
use arrow_flight::{FlightInfo, Ticket};
use duckarrow_common::sql::quote_literal;
use duckarrow_common::validation::split_authority;
use duckarrow_common::{
    ColumnInfo, ConnectionConfig, DuckArrowError, LogicalType, Result, TableInfo,
};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use tonic::transport::{Channel, ClientTlsConfig};

use crate::tls;

/// 256 MiB: large result sets arrive as few, fat record batches.
const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Keepalive stays conservative; aggressive pings trip server-side
/// ENHANCE_YOUR_CALM limits.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(20);
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

const DEFAULT_TLS_PORT: u16 = 443;

/// A connected Flight SQL session and its transport channel.
#[derive(Debug)]
pub struct FlightClient {
    config: ConnectionConfig,
    state: Mutex<ClientState>,
}

#[derive(Default, Debug)]
struct ClientState {
    session: Option<FlightSqlServiceClient<Channel>>,
    channel: Option<Channel>,
}

/// Server-side statement handle. Must be closed after the reader is
/// released.
#[derive(Debug)]
pub struct Statement {
    inner: PreparedStatement<Channel>,
}

impl Statement {
    pub async fn close(self) -> Result<()> {
        self.inner
            .close()
            .await
            .map_err(|e| DuckArrowError::Remote(format!("close statement: {e}")))
    }
}

type BatchStream = Pin<Box<dyn Stream<Item = Result<RecordBatch>> + Send>>;

/// Ordered record-batch stream over a statement's endpoint tickets.
pub struct QueryReader {
    schema: Option<SchemaRef>,
    stream: BatchStream,
}

impl std::fmt::Debug for QueryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryReader")
            .field("schema", &self.schema)
            .field("stream", &"<stream>")
            .finish()
    }
}

impl QueryReader {
    fn new(session: FlightSqlServiceClient<Channel>, info: FlightInfo) -> Self {
        let schema = info.clone().try_decode_schema().ok().map(SchemaRef::new);
        let tickets: Vec<Ticket> = info.endpoint.into_iter().filter_map(|e| e.ticket).collect();

        let stream = stream::iter(tickets)
            .then(move |ticket| {
                let mut session = session.clone();
                async move {
                    session
                        .do_get(ticket)
                        .await
                        .map(|batches| batches.map_err(flight_error))
                        .map_err(remote_error)
                }
            })
            .try_flatten();

        Self {
            schema,
            stream: Box::pin(stream),
        }
    }

    /// The result schema, available up front when the server put it in
    /// the flight info and otherwise after the first batch.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.schema.clone()
    }

    pub async fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        match self.stream.next().await {
            Some(Ok(batch)) => {
                if self.schema.is_none() {
                    self.schema = Some(batch.schema());
                }
                Ok(Some(batch))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    pub async fn drain(&mut self) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            batches.push(batch);
        }
        Ok(batches)
    }
}

impl FlightClient {
    /// Open a channel and authenticate. A non-empty username triggers the
    /// Flight handshake; otherwise an explicit token, when present, is
    /// installed directly.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let channel = build_channel(config).await?;
        let inner = FlightServiceClient::new(channel.clone())
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);
        let mut session = FlightSqlServiceClient::new_from_inner(inner);

        if !config.username.is_empty() {
            let token = session
                .handshake(&config.username, &config.password)
                .await
                .map_err(|e| DuckArrowError::Connect(format!("handshake failed: {e}")))?;
            if !token.is_empty() {
                if let Ok(token) = String::from_utf8(token.to_vec()) {
                    session.set_token(token);
                }
            }
        } else if let Some(token) = &config.token {
            session.set_token(token.clone());
        }

        tracing::debug!(uri = %config.uri, "connected to Flight SQL endpoint");
        Ok(Self {
            config: config.clone(),
            state: Mutex::new(ClientState {
                session: Some(session),
                channel: Some(channel),
            }),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Cheap liveness check: both the session and the transport handle
    /// are still present. No round-trip.
    pub fn is_healthy(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.session.is_some() && state.channel.is_some()
    }

    /// Drop the session, then the transport. Dropping the channel aborts
    /// any stream still in flight. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.session.take().is_some() || state.channel.take().is_some() {
            tracing::debug!(uri = %self.config.uri, "closed Flight SQL connection");
        }
    }

    fn session(&self) -> Result<FlightSqlServiceClient<Channel>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .session
            .clone()
            .ok_or_else(|| DuckArrowError::Transport("connection is closed".to_string()))
    }

    /// Create a statement, execute it, and return both handles. The
    /// caller must release the reader and then close the statement.
    pub async fn query(&self, sql: &str) -> Result<(Statement, QueryReader)> {
        let mut session = self.session()?;
        let prepared = session
            .prepare(sql.to_string(), None)
            .await
            .map_err(|e| DuckArrowError::StatementCreate(e.to_string()))?;
        let mut statement = Statement { inner: prepared };

        let info = match statement.inner.execute().await {
            Ok(info) => info,
            Err(e) => {
                let execute_err = DuckArrowError::Execute(e.to_string());
                if let Err(close_err) = statement.close().await {
                    tracing::warn!(error = %close_err, "closing failed statement");
                }
                return Err(execute_err);
            }
        };

        Ok((statement, QueryReader::new(session, info)))
    }

    /// Run a non-result statement (DDL/DML). Returns the server-reported
    /// affected-row count, -1 when the server does not report one.
    pub async fn execute(&self, sql: &str) -> Result<i64> {
        let mut session = self.session()?;
        session
            .execute_update(sql.to_string(), None)
            .await
            .map_err(|e| DuckArrowError::Remote(e.to_string()))
    }

    /// List schema names: structured metadata RPC first, one fallback to
    /// `information_schema`.
    pub async fn get_schemas(&self) -> Result<Vec<String>> {
        match self.get_schemas_via_rpc().await {
            Ok(schemas) => Ok(schemas),
            Err(rpc_err) => self
                .get_schemas_via_sql()
                .await
                .map_err(|sql_err| both_failed(rpc_err, sql_err)),
        }
    }

    /// List tables in a schema, with the same RPC-then-SQL strategy.
    pub async fn get_tables(&self, schema: &str) -> Result<Vec<TableInfo>> {
        match self.get_tables_via_rpc(schema).await {
            Ok(tables) => Ok(tables),
            Err(rpc_err) => self
                .get_tables_via_sql(schema)
                .await
                .map_err(|sql_err| both_failed(rpc_err, sql_err)),
        }
    }

    /// Describe a table's columns. An empty result means the table does
    /// not exist remotely.
    pub async fn get_columns(&self, schema: Option<&str>, table: &str) -> Result<Vec<ColumnInfo>> {
        match self.get_columns_via_rpc(schema, table).await {
            Ok(columns) => Ok(columns),
            Err(rpc_err) => self
                .get_columns_via_sql(schema, table)
                .await
                .map_err(|sql_err| both_failed(rpc_err, sql_err)),
        }
    }

    async fn get_schemas_via_rpc(&self) -> Result<Vec<String>> {
        let mut session = self.session()?;
        let info = session
            .get_db_schemas(CommandGetDbSchemas::default())
            .await
            .map_err(remote_error)?;
        let batches = QueryReader::new(session, info).drain().await?;

        let mut schemas = Vec::new();
        for batch in &batches {
            let Some(names) = string_column(batch, "db_schema_name") else {
                continue;
            };
            for row in 0..names.len() {
                if !names.is_null(row) {
                    schemas.push(names.value(row).to_string());
                }
            }
        }
        Ok(schemas)
    }

    async fn get_schemas_via_sql(&self) -> Result<Vec<String>> {
        let batches = self
            .query_collect("SELECT schema_name FROM information_schema.schemata")
            .await?;
        let mut schemas = Vec::new();
        for batch in &batches {
            let Some(names) = string_column_at(batch, 0) else {
                continue;
            };
            for row in 0..names.len() {
                if !names.is_null(row) {
                    schemas.push(names.value(row).to_string());
                }
            }
        }
        Ok(schemas)
    }

    async fn get_tables_via_rpc(&self, schema: &str) -> Result<Vec<TableInfo>> {
        let mut session = self.session()?;
        let command = CommandGetTables {
            catalog: None,
            db_schema_filter_pattern: Some(schema.to_string()),
            table_name_filter_pattern: None,
            table_types: vec![],
            include_schema: false,
        };
        let info = session.get_tables(command).await.map_err(remote_error)?;
        let batches = QueryReader::new(session, info).drain().await?;

        let mut tables = Vec::new();
        for batch in &batches {
            let Some(names) = string_column(batch, "table_name") else {
                continue;
            };
            let schemas = string_column(batch, "db_schema_name");
            for row in 0..batch.num_rows() {
                if names.is_null(row) {
                    continue;
                }
                let table_schema = match schemas {
                    Some(col) if !col.is_null(row) => col.value(row).to_string(),
                    _ => schema.to_string(),
                };
                tables.push(TableInfo {
                    schema: table_schema,
                    name: names.value(row).to_string(),
                });
            }
        }
        Ok(tables)
    }

    async fn get_tables_via_sql(&self, schema: &str) -> Result<Vec<TableInfo>> {
        let sql = format!(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = {}",
            quote_literal(schema)
        );
        let batches = self.query_collect(&sql).await?;

        let mut tables = Vec::new();
        for batch in &batches {
            let Some(names) = string_column_at(batch, 0) else {
                continue;
            };
            for row in 0..names.len() {
                if !names.is_null(row) {
                    tables.push(TableInfo {
                        schema: schema.to_string(),
                        name: names.value(row).to_string(),
                    });
                }
            }
        }
        Ok(tables)
    }

    async fn get_columns_via_rpc(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<ColumnInfo>> {
        let mut session = self.session()?;
        let command = CommandGetTables {
            catalog: None,
            db_schema_filter_pattern: schema.map(str::to_string),
            table_name_filter_pattern: Some(table.to_string()),
            table_types: vec![],
            include_schema: true,
        };
        let info = session.get_tables(command).await.map_err(remote_error)?;
        let batches = QueryReader::new(session, info).drain().await?;

        for batch in &batches {
            let Some(names) = string_column(batch, "table_name") else {
                continue;
            };
            for row in 0..batch.num_rows() {
                if names.is_null(row) || !names.value(row).eq_ignore_ascii_case(table) {
                    continue;
                }
                let Some(schema_bytes) = binary_value(batch, "table_schema", row) else {
                    continue;
                };
                let table_schema = try_schema_from_ipc_buffer(&schema_bytes)
                    .map_err(|e| DuckArrowError::Remote(format!("decode table schema: {e}")))?;
                return Ok(table_schema
                    .fields()
                    .iter()
                    .enumerate()
                    .map(|(idx, field)| ColumnInfo {
                        name: field.name().clone(),
                        type_name: LogicalType::from_arrow(field.data_type()).to_string(),
                        nullable: field.is_nullable(),
                        ordinal_position: idx as i32 + 1,
                    })
                    .collect());
            }
        }
        Ok(Vec::new())
    }

    async fn get_columns_via_sql(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<ColumnInfo>> {
        let mut sql = format!(
            "SELECT column_name, data_type, is_nullable, ordinal_position \
             FROM information_schema.columns WHERE table_name = {}",
            quote_literal(table)
        );
        if let Some(schema) = schema {
            sql.push_str(&format!(" AND table_schema = {}", quote_literal(schema)));
        }
        sql.push_str(" ORDER BY ordinal_position");

        let batches = self.query_collect(&sql).await?;
        let mut columns = Vec::new();
        for batch in &batches {
            if batch.num_columns() < 4 {
                continue;
            }
            let Some(names) = string_column_at(batch, 0) else {
                continue;
            };
            let types = string_column_at(batch, 1);
            for row in 0..batch.num_rows() {
                if names.is_null(row) {
                    continue;
                }
                let type_name = match types {
                    Some(col) if !col.is_null(row) => col.value(row).to_string(),
                    _ => String::new(),
                };
                columns.push(ColumnInfo {
                    name: names.value(row).to_string(),
                    type_name,
                    nullable: nullable_at(batch, 2, row),
                    ordinal_position: ordinal_at(batch, 3, row).unwrap_or(row as i32 + 1),
                });
            }
        }
        Ok(columns)
    }

    async fn query_collect(&self, sql: &str) -> Result<Vec<RecordBatch>> {
        let (statement, mut reader) = self.query(sql).await?;
        let result = reader.drain().await;
        drop(reader);
        if let Err(e) = statement.close().await {
            tracing::warn!(error = %e, "closing metadata statement");
        }
        result
    }
}

async fn build_channel(config: &ConnectionConfig) -> Result<Channel> {
    let (use_tls, authority) = if let Some(rest) = config.uri.strip_prefix("grpc+tls://") {
        (true, rest)
    } else if let Some(rest) = config.uri.strip_prefix("grpc://") {
        (false, rest)
    } else {
        return Err(DuckArrowError::InvalidArgument(
            "URI must start with grpc:// or grpc+tls://".to_string(),
        ));
    };

    let scheme = if use_tls && !config.skip_verify {
        "https"
    } else {
        "http"
    };
    let endpoint = Channel::from_shared(format!("{scheme}://{authority}"))
        .map_err(|e| DuckArrowError::InvalidArgument(format!("invalid URI: {e}")))?
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_keepalive(Some(TCP_KEEPALIVE))
        .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
        .keep_alive_timeout(KEEPALIVE_TIMEOUT)
        .keep_alive_while_idle(false);

    if use_tls && config.skip_verify {
        let (host, port) = authority_host_port(authority)?;
        tls::connect_skip_verify(endpoint, host, port).await
    } else if use_tls {
        endpoint
            .tls_config(ClientTlsConfig::new().with_native_roots())
            .map_err(|e| DuckArrowError::Connect(format!("tls configuration: {e}")))?
            .connect()
            .await
            .map_err(|e| DuckArrowError::Connect(e.to_string()))
    } else {
        endpoint
            .connect()
            .await
            .map_err(|e| DuckArrowError::Connect(e.to_string()))
    }
}

fn authority_host_port(authority: &str) -> Result<(String, u16)> {
    let authority = authority.split('/').next().unwrap_or_default();
    let (host, port) = split_authority(authority);
    if host.is_empty() {
        return Err(DuckArrowError::InvalidArgument(
            "URI must include a valid host".to_string(),
        ));
    }
    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| {
            DuckArrowError::InvalidArgument("URI must include a valid host".to_string())
        })?,
        None => DEFAULT_TLS_PORT,
    };
    Ok((host.to_string(), port))
}

fn both_failed(rpc_err: DuckArrowError, sql_err: DuckArrowError) -> DuckArrowError {
    DuckArrowError::Remote(format!(
        "metadata request failed: {}; fallback query failed: {}",
        rpc_err.message(),
        sql_err.message()
    ))
}

fn remote_error(e: arrow::error::ArrowError) -> DuckArrowError {
    DuckArrowError::Remote(e.to_string())
}

fn flight_error(e: FlightError) -> DuckArrowError {
    DuckArrowError::Remote(e.to_string())
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    let idx = batch.schema().index_of(name).ok()?;
    batch.column(idx).as_any().downcast_ref::<StringArray>()
}

fn string_column_at(batch: &RecordBatch, idx: usize) -> Option<&StringArray> {
    if idx >= batch.num_columns() {
        return None;
    }
    batch.column(idx).as_any().downcast_ref::<StringArray>()
}

fn binary_value(batch: &RecordBatch, name: &str, row: usize) -> Option<Vec<u8>> {
    let idx = batch.schema().index_of(name).ok()?;
    let column = batch.column(idx);
    if let Some(array) = column.as_any().downcast_ref::<BinaryArray>() {
        return (!array.is_null(row)).then(|| array.value(row).to_vec());
    }
    if let Some(array) = column.as_any().downcast_ref::<LargeBinaryArray>() {
        return (!array.is_null(row)).then(|| array.value(row).to_vec());
    }
    None
}

/// Nullable markers vary by server: YES/NO strings, or the xdbc small-int
/// convention where 1 means nullable, 0 not, and anything else unknown
/// (treated as nullable).
fn nullable_at(batch: &RecordBatch, idx: usize, row: usize) -> bool {
    if idx >= batch.num_columns() {
        return true;
    }
    let column = batch.column(idx);
    if column.is_null(row) {
        return true;
    }
    if let Some(array) = column.as_any().downcast_ref::<StringArray>() {
        return array.value(row).eq_ignore_ascii_case("yes");
    }
    if let Some(array) = column.as_any().downcast_ref::<Int16Array>() {
        return array.value(row) != 0;
    }
    if let Some(array) = column.as_any().downcast_ref::<Int32Array>() {
        return array.value(row) != 0;
    }
    true
}

/// Ordinal positions arrive as int32 or int64 depending on the server.
fn ordinal_at(batch: &RecordBatch, idx: usize, row: usize) -> Option<i32> {
    if idx >= batch.num_columns() {
        return None;
    }
    let column = batch.column(idx);
    if column.is_null(row) {
        return None;
    }
    if let Some(array) = column.as_any().downcast_ref::<Int32Array>() {
        return Some(array.value(row));
    }
    if let Some(array) = column.as_any().downcast_ref::<Int64Array>() {
        return Some(array.value(row) as i32);
    }
    None
}
