//! The capability facade the host drives
//!
//! One `DuckArrow` per process owns the global configuration, the
//! connection pool, the scan-handle registry, and the attached catalogs.
//! Everything crossing to the host is a value or an opaque integer
//! handle.

use crate::functions;
use crate::replacement::{self, ReplacementScan};
use dashmap::DashMap;
use duckarrow_catalog::{AttachOptions, RemoteCatalog};
use duckarrow_common::sql::extract_table_name;
use duckarrow_common::validation::{validate_table_name, validate_uri};
use duckarrow_common::{
    ColumnDescriptor, ConnectionConfig, DuckArrowError, GlobalConfig, LogicalType, Result,
};
use duckarrow_flight::Pool;
use duckarrow_scan::{DataChunk, ScanRegistry};
use std::sync::Arc;

pub struct DuckArrow {
    global: GlobalConfig,
    pool: Arc<Pool>,
    scans: ScanRegistry,
    catalogs: DashMap<String, Arc<RemoteCatalog>>,
}

impl Default for DuckArrow {
    fn default() -> Self {
        Self::new()
    }
}

impl DuckArrow {
    pub fn new() -> Self {
        Self {
            global: GlobalConfig::new(),
            pool: Arc::new(Pool::new()),
            scans: ScanRegistry::new(),
            catalogs: DashMap::new(),
        }
    }

    pub fn global_config(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn scans(&self) -> &ScanRegistry {
        &self.scans
    }

    /// `remote_configure(uri, user, pass [, skip_verify])`.
    pub fn configure(
        &self,
        uri: Option<&str>,
        username: &str,
        password: &str,
        skip_verify: Option<bool>,
    ) -> Result<Option<&'static str>> {
        functions::configure(&self.global, uri, username, password, skip_verify)
            .map_err(|e| DuckArrowError::function("remote_configure", e))
    }

    /// `remote_version()`.
    pub fn version(&self) -> &'static str {
        functions::version()
    }

    /// `remote_execute(sql)`: pass-through DDL/DML returning the
    /// affected-row count.
    pub async fn execute(&self, sql: Option<&str>) -> Result<Option<i64>> {
        functions::execute(&self.pool, &self.global, sql)
            .await
            .map_err(|e| DuckArrowError::function("remote_execute", e))
    }

    /// Replacement-scan callback for unknown tables in the virtual
    /// schema.
    pub fn replacement_scan(&self, table_name: &str) -> Result<Option<ReplacementScan>> {
        replacement::replacement_scan(&self.global, table_name)
            .map_err(|e| DuckArrowError::function(replacement::VIRTUAL_SCHEMA, e))
    }

    /// `ATTACH '<uri>' AS <name> (TYPE duckarrow, ...)`.
    pub async fn attach(
        &self,
        name: &str,
        uri: &str,
        options: AttachOptions,
    ) -> Result<Arc<RemoteCatalog>> {
        if self.catalogs.contains_key(name) {
            return Err(DuckArrowError::InvalidArgument(format!(
                "database \"{name}\" is already attached"
            )));
        }
        let catalog = RemoteCatalog::attach(name, uri, options, self.global.snapshot()).await?;
        match self.catalogs.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(catalog.clone());
                Ok(catalog)
            }
            dashmap::mapref::entry::Entry::Occupied(_) => {
                catalog.detach();
                Err(DuckArrowError::InvalidArgument(format!(
                    "database \"{name}\" is already attached"
                )))
            }
        }
    }

    pub fn catalog(&self, name: &str) -> Option<Arc<RemoteCatalog>> {
        self.catalogs.get(name).map(|entry| entry.value().clone())
    }

    pub fn detach(&self, name: &str) -> Result<()> {
        let (_, catalog) = self.catalogs.remove(name).ok_or_else(|| {
            DuckArrowError::NotFound(format!("database \"{name}\" is not attached"))
        })?;
        catalog.detach();
        Ok(())
    }

    /// Bind a scan over `schema.table` at the given endpoint, using the
    /// configuration snapshot current at bind time for credentials.
    pub async fn bind_table_scan(
        &self,
        uri: &str,
        schema: Option<&str>,
        table: &str,
    ) -> Result<(u64, usize)> {
        validate_uri(uri)?;
        let config = self.scan_config(uri);
        self.scans.bind(self.pool.clone(), config, schema, table).await
    }

    /// `remote_query(uri, sql)`: the sql must be the synthesized
    /// single-table shape the rewriter emits.
    pub async fn bind_remote_query(&self, uri: &str, sql: &str) -> Result<(u64, usize)> {
        validate_uri(uri)?;
        let table = extract_table_name(sql).ok_or_else(|| {
            DuckArrowError::InvalidArgument(
                "remote_query expects a query of the form SELECT * FROM \"table\"".to_string(),
            )
        })?;
        validate_table_name(&table)?;
        let config = self.scan_config(uri);
        self.scans.bind(self.pool.clone(), config, None, &table).await
    }

    fn scan_config(&self, uri: &str) -> ConnectionConfig {
        match self.global.snapshot() {
            Some(snapshot) => ConnectionConfig {
                uri: uri.to_string(),
                username: snapshot.username.clone(),
                password: snapshot.password.clone(),
                token: snapshot.token.clone(),
                skip_verify: snapshot.skip_verify,
            },
            None => ConnectionConfig::new(uri),
        }
    }

    pub async fn scan_column(&self, handle: u64, index: usize) -> Result<ColumnDescriptor> {
        self.scans.column(handle, index).await
    }

    pub async fn scan_output_types(&self, handle: u64) -> Result<Vec<LogicalType>> {
        self.scans.output_types(handle).await
    }

    pub async fn scan_init(&self, handle: u64, projection: &[usize]) -> Result<()> {
        self.scans.init(handle, projection).await
    }

    pub async fn scan_next(&self, handle: u64, chunk: &mut DataChunk) -> Result<usize> {
        self.scans.next(handle, chunk).await
    }

    pub async fn scan_free(&self, handle: u64) -> Result<()> {
        self.scans.free(handle).await
    }

    /// Process teardown: free live scans, detach catalogs, close the
    /// pool.
    pub async fn close(&self) {
        self.scans.close().await;
        let names: Vec<String> = self.catalogs.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            if let Some((_, catalog)) = self.catalogs.remove(&name) {
                catalog.detach();
            }
        }
        self.pool.close();
    }
}
