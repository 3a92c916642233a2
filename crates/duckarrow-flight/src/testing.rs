//! In-process Flight SQL service for tests
//!
//! Serves registered record batches over the real wire protocol, records
//! every SQL string it receives, and can disable its structured metadata
//! RPCs to force clients down the `information_schema` fallback path. It
//! understands exactly the query shapes the extension emits.

use arrow::array::{ArrayRef, BinaryArray, Int32Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::ipc::writer::IpcWriteOptions;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::flight_service_server::{FlightService, FlightServiceServer};
use arrow_flight::sql::server::{FlightSqlService, PeekableFlightDataStream};
use arrow_flight::sql::{
    ActionClosePreparedStatementRequest, ActionCreatePreparedStatementRequest,
    ActionCreatePreparedStatementResult, CommandGetDbSchemas, CommandGetTables,
    CommandPreparedStatementQuery, CommandStatementUpdate, ProstMessageExt, SqlInfo,
};
use arrow_flight::{
    Action, FlightDescriptor, FlightEndpoint, FlightInfo, HandshakeRequest, HandshakeResponse,
    IpcMessage, SchemaAsIpc, Ticket,
};
use duckarrow_common::LogicalType;
use futures::{Stream, TryStreamExt};
use prost::Message;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

#[derive(Clone)]
struct TestTable {
    schema_name: String,
    table_name: String,
    batch: RecordBatch,
}

struct ServerState {
    tables: Vec<TestTable>,
    metadata_rpc: bool,
    affected_rows: AtomicI64,
    execute_error: Option<String>,
    sql_log: Mutex<Vec<String>>,
    statements: Mutex<HashMap<String, String>>,
}

/// Builder for the test server.
pub struct TestFlightSqlServer {
    tables: Vec<TestTable>,
    metadata_rpc: bool,
    affected_rows: i64,
    execute_error: Option<String>,
}

impl Default for TestFlightSqlServer {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFlightSqlServer {
    pub fn new() -> Self {
        Self {
            tables: Vec::new(),
            metadata_rpc: true,
            affected_rows: 1,
            execute_error: None,
        }
    }

    /// Register a table. An empty schema name registers an unqualified
    /// table.
    pub fn with_table(mut self, schema: &str, table: &str, batch: RecordBatch) -> Self {
        self.tables.push(TestTable {
            schema_name: schema.to_string(),
            table_name: table.to_string(),
            batch,
        });
        self
    }

    /// Answer the structured metadata RPCs with `unimplemented`, forcing
    /// clients onto the information_schema fallback.
    pub fn without_metadata_rpc(mut self) -> Self {
        self.metadata_rpc = false;
        self
    }

    pub fn with_affected_rows(mut self, rows: i64) -> Self {
        self.affected_rows = rows;
        self
    }

    /// Fail every update statement with this message.
    pub fn with_execute_error(mut self, message: &str) -> Self {
        self.execute_error = Some(message.to_string());
        self
    }

    pub async fn spawn(self) -> TestServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");

        let state = Arc::new(ServerState {
            tables: self.tables,
            metadata_rpc: self.metadata_rpc,
            affected_rows: AtomicI64::new(self.affected_rows),
            execute_error: self.execute_error,
            sql_log: Mutex::new(Vec::new()),
            statements: Mutex::new(HashMap::new()),
        });

        let service = TestFlightSqlService {
            state: state.clone(),
        };
        let task = tokio::spawn(async move {
            let incoming = TcpListenerStream::new(listener);
            if let Err(e) = Server::builder()
                .add_service(FlightServiceServer::new(service))
                .serve_with_incoming(incoming)
                .await
            {
                tracing::error!("test flight server error: {e}");
            }
        });

        tracing::info!("test Flight SQL server listening on {addr}");
        TestServerHandle { addr, state, task }
    }
}

/// Running test server. Dropping it aborts the serve task.
pub struct TestServerHandle {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl TestServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn uri(&self) -> String {
        format!("grpc://{}", self.addr)
    }

    /// Every SQL string the server has executed, in arrival order.
    pub fn executed_sql(&self) -> Vec<String> {
        self.state
            .sql_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of prepared statements not yet closed by a client.
    pub fn open_statements(&self) -> usize {
        self.state
            .statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Drop for TestServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
struct TestFlightSqlService {
    state: Arc<ServerState>,
}

type BoxedFlightStream =
    Pin<Box<dyn Stream<Item = Result<arrow_flight::FlightData, Status>> + Send + 'static>>;

impl TestFlightSqlService {
    fn log_sql(&self, sql: &str) {
        self.state
            .sql_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sql.to_string());
    }

    fn statement_sql(&self, handle_bytes: &[u8]) -> Result<String, Status> {
        let handle = String::from_utf8(handle_bytes.to_vec())
            .map_err(|_| Status::invalid_argument("invalid statement handle"))?;
        self.state
            .statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle)
            .cloned()
            .ok_or_else(|| Status::not_found(format!("unknown statement handle: {handle}")))
    }

    fn batches_to_stream(schema: SchemaRef, batches: Vec<RecordBatch>) -> BoxedFlightStream {
        let stream = futures::stream::iter(batches.into_iter().map(Ok));
        let flight = FlightDataEncoderBuilder::new()
            .with_schema(schema)
            .build(stream)
            .map_err(|e| Status::internal(format!("flight encoding error: {e}")));
        Box::pin(flight)
    }

    fn flight_info(
        schema: &Schema,
        ticket_bytes: Vec<u8>,
        descriptor: FlightDescriptor,
    ) -> Result<FlightInfo, Status> {
        Ok(FlightInfo::new()
            .try_with_schema(schema)
            .map_err(|e| Status::internal(format!("schema encoding error: {e}")))?
            .with_endpoint(FlightEndpoint::new().with_ticket(Ticket::new(ticket_bytes)))
            .with_descriptor(descriptor))
    }

    fn find_table(&self, schema: Option<&str>, table: &str) -> Option<&TestTable> {
        self.state.tables.iter().find(|t| {
            t.table_name.eq_ignore_ascii_case(table)
                && match schema {
                    Some(schema) => t.schema_name == schema,
                    None => true,
                }
        })
    }

    /// Answer the query shapes the extension emits: the three
    /// information_schema fallbacks and plain (optionally projected,
    /// optionally schema-only) SELECTs over registered tables.
    fn resolve_query(&self, sql: &str) -> Result<(SchemaRef, Vec<RecordBatch>), Status> {
        let trimmed = sql.trim();

        if trimmed.starts_with("SELECT schema_name FROM information_schema.schemata") {
            return Ok(self.schemata_result());
        }
        if trimmed.starts_with("SELECT table_name FROM information_schema.tables") {
            let schema = extract_literal(trimmed, "table_schema = ");
            return Ok(self.table_names_result(schema.as_deref()));
        }
        if trimmed.starts_with(
            "SELECT column_name, data_type, is_nullable, ordinal_position \
             FROM information_schema.columns",
        ) {
            let schema = extract_literal(trimmed, "table_schema = ");
            let table = extract_literal(trimmed, "table_name = ");
            return Ok(self.columns_result(schema.as_deref(), table.as_deref()));
        }

        let (projection, (schema_name, table_name), schema_only) = parse_select(trimmed)
            .ok_or_else(|| Status::invalid_argument(format!("unsupported test query: {sql}")))?;

        let table = self
            .find_table(schema_name.as_deref(), &table_name)
            .ok_or_else(|| Status::not_found(format!("table not found: {table_name}")))?;

        let batch = match &projection {
            Some(columns) => project_batch(&table.batch, columns)?,
            None => table.batch.clone(),
        };
        let schema = batch.schema();
        if schema_only {
            Ok((schema, vec![]))
        } else {
            Ok((schema, vec![batch]))
        }
    }

    fn schemata_result(&self) -> (SchemaRef, Vec<RecordBatch>) {
        let mut names: Vec<String> = Vec::new();
        for table in &self.state.tables {
            if !table.schema_name.is_empty() && !names.contains(&table.schema_name) {
                names.push(table.schema_name.clone());
            }
        }
        string_batch("schema_name", names)
    }

    fn table_names_result(&self, schema: Option<&str>) -> (SchemaRef, Vec<RecordBatch>) {
        let names: Vec<String> = self
            .state
            .tables
            .iter()
            .filter(|t| schema.map_or(true, |s| t.schema_name == s))
            .map(|t| t.table_name.clone())
            .collect();
        string_batch("table_name", names)
    }

    fn columns_result(
        &self,
        schema: Option<&str>,
        table: Option<&str>,
    ) -> (SchemaRef, Vec<RecordBatch>) {
        let result_schema = Arc::new(Schema::new(vec![
            Field::new("column_name", DataType::Utf8, false),
            Field::new("data_type", DataType::Utf8, true),
            Field::new("is_nullable", DataType::Utf8, true),
            Field::new("ordinal_position", DataType::Int32, true),
        ]));

        let found = table.and_then(|t| self.find_table(schema, t));
        let (mut names, mut types, mut nullables, mut ordinals) =
            (Vec::new(), Vec::new(), Vec::new(), Vec::new());
        if let Some(table) = found {
            for (idx, field) in table.batch.schema().fields().iter().enumerate() {
                names.push(field.name().clone());
                types.push(LogicalType::from_arrow(field.data_type()).to_string());
                nullables.push(if field.is_nullable() { "YES" } else { "NO" }.to_string());
                ordinals.push(idx as i32 + 1);
            }
        }

        let batch = RecordBatch::try_new(
            result_schema.clone(),
            vec![
                Arc::new(StringArray::from(names)) as ArrayRef,
                Arc::new(StringArray::from(types)) as ArrayRef,
                Arc::new(StringArray::from(nullables)) as ArrayRef,
                Arc::new(Int32Array::from(ordinals)) as ArrayRef,
            ],
        )
        .expect("columns result batch");
        (result_schema, vec![batch])
    }

    fn db_schemas_result(&self, query: &CommandGetDbSchemas) -> (SchemaRef, Vec<RecordBatch>) {
        let filter = query.db_schema_filter_pattern.as_deref();
        let mut names: Vec<String> = Vec::new();
        for table in &self.state.tables {
            if table.schema_name.is_empty() {
                continue;
            }
            if filter.map_or(true, |f| f == table.schema_name) && !names.contains(&table.schema_name)
            {
                names.push(table.schema_name.clone());
            }
        }

        let schema = Arc::new(Schema::new(vec![
            Field::new("catalog_name", DataType::Utf8, true),
            Field::new("db_schema_name", DataType::Utf8, false),
        ]));
        let count = names.len();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![None::<&str>; count])) as ArrayRef,
                Arc::new(StringArray::from(names)) as ArrayRef,
            ],
        )
        .expect("db schemas batch");
        (schema, vec![batch])
    }

    fn tables_result(
        &self,
        query: &CommandGetTables,
    ) -> Result<(SchemaRef, Vec<RecordBatch>), Status> {
        let schema_filter = query.db_schema_filter_pattern.as_deref();
        let table_filter = query.table_name_filter_pattern.as_deref();

        let matching: Vec<&TestTable> = self
            .state
            .tables
            .iter()
            .filter(|t| schema_filter.map_or(true, |f| t.schema_name == f))
            .filter(|t| table_filter.map_or(true, |f| t.table_name.eq_ignore_ascii_case(f)))
            .collect();

        let mut fields = vec![
            Field::new("catalog_name", DataType::Utf8, true),
            Field::new("db_schema_name", DataType::Utf8, true),
            Field::new("table_name", DataType::Utf8, false),
            Field::new("table_type", DataType::Utf8, false),
        ];
        if query.include_schema {
            fields.push(Field::new("table_schema", DataType::Binary, false));
        }
        let schema = Arc::new(Schema::new(fields));

        let count = matching.len();
        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec![None::<&str>; count])),
            Arc::new(StringArray::from(
                matching
                    .iter()
                    .map(|t| t.schema_name.clone())
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                matching
                    .iter()
                    .map(|t| t.table_name.clone())
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(vec!["TABLE".to_string(); count])),
        ];
        if query.include_schema {
            let mut serialized: Vec<Vec<u8>> = Vec::with_capacity(count);
            for table in &matching {
                let IpcMessage(bytes) =
                    SchemaAsIpc::new(table.batch.schema().as_ref(), &IpcWriteOptions::default())
                        .try_into()
                        .map_err(|e: arrow::error::ArrowError| Status::internal(e.to_string()))?;
                serialized.push(bytes.to_vec());
            }
            columns.push(Arc::new(BinaryArray::from_iter_values(
                serialized.iter().map(|b| b.as_slice()),
            )));
        }

        let batch = RecordBatch::try_new(schema.clone(), columns)
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok((schema, vec![batch]))
    }
}

#[tonic::async_trait]
impl FlightSqlService for TestFlightSqlService {
    type FlightService = TestFlightSqlService;

    async fn do_handshake(
        &self,
        _request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<
        Response<Pin<Box<dyn Stream<Item = Result<HandshakeResponse, Status>> + Send>>>,
        Status,
    > {
        let response = HandshakeResponse {
            protocol_version: 0,
            payload: prost::bytes::Bytes::from_static(b"test-token"),
        };
        let stream = futures::stream::iter(vec![Ok(response)]);
        Ok(Response::new(Box::pin(stream)))
    }

    async fn do_action_create_prepared_statement(
        &self,
        query: ActionCreatePreparedStatementRequest,
        _request: Request<Action>,
    ) -> Result<ActionCreatePreparedStatementResult, Status> {
        // Errors in the statement surface at execute time, matching
        // servers that defer planning.
        let dataset_schema = match self.resolve_query(&query.query) {
            Ok((schema, _)) => schema,
            Err(_) => Arc::new(Schema::empty()),
        };

        let handle = uuid::Uuid::new_v4().to_string();
        self.state
            .statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.clone(), query.query.clone());

        let IpcMessage(dataset_bytes) =
            SchemaAsIpc::new(dataset_schema.as_ref(), &IpcWriteOptions::default())
                .try_into()
                .map_err(|e: arrow::error::ArrowError| Status::internal(e.to_string()))?;
        let IpcMessage(parameter_bytes) =
            SchemaAsIpc::new(&Schema::empty(), &IpcWriteOptions::default())
                .try_into()
                .map_err(|e: arrow::error::ArrowError| Status::internal(e.to_string()))?;

        Ok(ActionCreatePreparedStatementResult {
            prepared_statement_handle: handle.into_bytes().into(),
            dataset_schema: dataset_bytes,
            parameter_schema: parameter_bytes,
        })
    }

    async fn do_action_close_prepared_statement(
        &self,
        query: ActionClosePreparedStatementRequest,
        _request: Request<Action>,
    ) -> Result<(), Status> {
        if let Ok(handle) = String::from_utf8(query.prepared_statement_handle.to_vec()) {
            self.state
                .statements
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&handle);
        }
        Ok(())
    }

    async fn get_flight_info_prepared_statement(
        &self,
        cmd: CommandPreparedStatementQuery,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        let sql = self.statement_sql(&cmd.prepared_statement_handle)?;
        self.log_sql(&sql);
        let (schema, _) = self.resolve_query(&sql)?;

        let info = Self::flight_info(
            schema.as_ref(),
            cmd.as_any().encode_to_vec(),
            request.into_inner(),
        )?;
        Ok(Response::new(info))
    }

    async fn do_get_prepared_statement(
        &self,
        cmd: CommandPreparedStatementQuery,
        _request: Request<Ticket>,
    ) -> Result<Response<<Self as FlightService>::DoGetStream>, Status> {
        let sql = self.statement_sql(&cmd.prepared_statement_handle)?;
        let (schema, batches) = self.resolve_query(&sql)?;
        Ok(Response::new(Self::batches_to_stream(schema, batches)))
    }

    async fn do_put_statement_update(
        &self,
        ticket: CommandStatementUpdate,
        _request: Request<PeekableFlightDataStream>,
    ) -> Result<i64, Status> {
        self.log_sql(&ticket.query);
        if let Some(message) = &self.state.execute_error {
            return Err(Status::internal(message.clone()));
        }
        Ok(self.state.affected_rows.load(Ordering::Relaxed))
    }

    async fn get_flight_info_schemas(
        &self,
        query: CommandGetDbSchemas,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        if !self.state.metadata_rpc {
            return Err(Status::unimplemented("metadata rpc disabled"));
        }
        let (schema, _) = self.db_schemas_result(&query);
        let info = Self::flight_info(
            schema.as_ref(),
            query.as_any().encode_to_vec(),
            request.into_inner(),
        )?;
        Ok(Response::new(info))
    }

    async fn do_get_schemas(
        &self,
        query: CommandGetDbSchemas,
        _request: Request<Ticket>,
    ) -> Result<Response<<Self as FlightService>::DoGetStream>, Status> {
        if !self.state.metadata_rpc {
            return Err(Status::unimplemented("metadata rpc disabled"));
        }
        let (schema, batches) = self.db_schemas_result(&query);
        Ok(Response::new(Self::batches_to_stream(schema, batches)))
    }

    async fn get_flight_info_tables(
        &self,
        query: CommandGetTables,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        if !self.state.metadata_rpc {
            return Err(Status::unimplemented("metadata rpc disabled"));
        }
        let (schema, _) = self.tables_result(&query)?;
        let info = Self::flight_info(
            schema.as_ref(),
            query.as_any().encode_to_vec(),
            request.into_inner(),
        )?;
        Ok(Response::new(info))
    }

    async fn do_get_tables(
        &self,
        query: CommandGetTables,
        _request: Request<Ticket>,
    ) -> Result<Response<<Self as FlightService>::DoGetStream>, Status> {
        if !self.state.metadata_rpc {
            return Err(Status::unimplemented("metadata rpc disabled"));
        }
        let (schema, batches) = self.tables_result(&query)?;
        Ok(Response::new(Self::batches_to_stream(schema, batches)))
    }

    async fn register_sql_info(&self, _id: i32, _result: &SqlInfo) {}
}

fn string_batch(field_name: &str, values: Vec<String>) -> (SchemaRef, Vec<RecordBatch>) {
    let schema = Arc::new(Schema::new(vec![Field::new(
        field_name,
        DataType::Utf8,
        false,
    )]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(StringArray::from(values)) as ArrayRef],
    )
    .expect("string batch");
    (schema, vec![batch])
}

fn project_batch(batch: &RecordBatch, columns: &[String]) -> Result<RecordBatch, Status> {
    let schema = batch.schema();
    let indices = columns
        .iter()
        .map(|c| {
            schema
                .index_of(c)
                .map_err(|_| Status::invalid_argument(format!("unknown column: {c}")))
        })
        .collect::<Result<Vec<usize>, Status>>()?;
    batch
        .project(&indices)
        .map_err(|e| Status::internal(e.to_string()))
}

/// Parse `SELECT <cols|*> FROM <target> [WHERE 1=0]` where `<cols>` is a
/// list of quoted identifiers and `<target>` is `"t"` or `"s"."t"`.
#[allow(clippy::type_complexity)]
fn parse_select(sql: &str) -> Option<(Option<Vec<String>>, (Option<String>, String), bool)> {
    let (body, schema_only) = match sql.strip_suffix(" WHERE 1=0") {
        Some(body) => (body, true),
        None => (sql, false),
    };
    let rest = body.strip_prefix("SELECT ")?;
    let from_pos = rest.find(" FROM ")?;
    let columns_part = rest[..from_pos].trim();
    let target_part = rest[from_pos + " FROM ".len()..].trim();

    let projection = if columns_part == "*" {
        None
    } else {
        Some(split_identifiers(columns_part)?)
    };
    let target = parse_qualified(target_part)?;
    Some((projection, target, schema_only))
}

fn split_identifiers(input: &str) -> Option<Vec<String>> {
    let mut columns = Vec::new();
    let mut rest = input.trim();
    loop {
        let (name, tail) = parse_quoted(rest)?;
        columns.push(name);
        rest = tail.trim_start();
        if rest.is_empty() {
            return Some(columns);
        }
        rest = rest.strip_prefix(',')?.trim_start();
    }
}

fn parse_quoted(input: &str) -> Option<(String, &str)> {
    let inner = input.strip_prefix('"')?;
    let mut name = String::new();
    let mut chars = inner.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if c == '"' {
            if matches!(chars.peek(), Some((_, '"'))) {
                chars.next();
                name.push('"');
            } else {
                return Some((name, &inner[idx + 1..]));
            }
        } else {
            name.push(c);
        }
    }
    None
}

fn parse_qualified(target: &str) -> Option<(Option<String>, String)> {
    let (first, rest) = parse_quoted(target)?;
    let rest = rest.trim_start();
    if rest.is_empty() {
        return Some((None, first));
    }
    let rest = rest.strip_prefix('.')?;
    let (second, tail) = parse_quoted(rest.trim_start())?;
    if tail.trim().is_empty() {
        Some((Some(first), second))
    } else {
        None
    }
}

/// Pull the single-quoted literal following `marker`, unescaping doubled
/// quotes.
fn extract_literal(sql: &str, marker: &str) -> Option<String> {
    let start = sql.find(marker)? + marker.len();
    let rest = sql[start..].strip_prefix('\'')?;
    let mut value = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                value.push('\'');
            } else {
                return Some(value);
            }
        } else {
            value.push(c);
        }
    }
    None
}
