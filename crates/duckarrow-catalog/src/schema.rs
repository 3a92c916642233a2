//! Schema entries: table discovery and lookup within one remote schema

use crate::read_only;
use crate::table::RemoteTableEntry;
use dashmap::DashMap;
use duckarrow_common::{ConnectionConfig, DuckArrowError, Result, TableInfo};
use duckarrow_flight::FlightClient;
use std::sync::Arc;

/// What a lookup does when the remote reports no such table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnEntryNotFound {
    Error,
    ReturnNone,
}

/// Lazily populated table entries for one schema. Table keys are
/// case-insensitive; the schema name itself is case-sensitive.
#[derive(Debug)]
pub struct RemoteSchemaEntry {
    schema_name: String,
    client: Arc<FlightClient>,
    config: ConnectionConfig,
    tables: DashMap<String, Arc<RemoteTableEntry>>,
}

impl RemoteSchemaEntry {
    pub(crate) fn new(
        schema_name: &str,
        client: Arc<FlightClient>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            schema_name: schema_name.to_string(),
            client,
            config,
            tables: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.schema_name
    }

    /// Cache-first table lookup; a miss asks the remote for columns. An
    /// empty column list means the table does not exist.
    pub async fn lookup_table(
        &self,
        name: &str,
        if_not_found: OnEntryNotFound,
    ) -> Result<Option<Arc<RemoteTableEntry>>> {
        let key = name.to_lowercase();
        if let Some(entry) = self.tables.get(&key) {
            return Ok(Some(entry.value().clone()));
        }

        let schema_filter = (!self.schema_name.is_empty()).then_some(self.schema_name.as_str());
        let columns = self.client.get_columns(schema_filter, name).await?;
        if columns.is_empty() {
            return match if_not_found {
                OnEntryNotFound::ReturnNone => Ok(None),
                OnEntryNotFound::Error => Err(DuckArrowError::NotFound(format!(
                    "table \"{}\" not found in schema \"{}\"",
                    name, self.schema_name
                ))),
            };
        }

        tracing::debug!(
            schema = %self.schema_name,
            table = name,
            columns = columns.len(),
            "materialized remote table entry"
        );
        let entry = Arc::new(RemoteTableEntry::new(
            self.schema_name.clone(),
            name.to_string(),
            columns,
            self.config.clone(),
        ));
        Ok(Some(self.tables.entry(key).or_insert(entry).value().clone()))
    }

    /// The remote's table list for this schema (uncached; callers that
    /// need entries go through `lookup_table`).
    pub async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        self.client.get_tables(&self.schema_name).await
    }

    pub fn create_table(&self, _name: &str) -> Result<()> {
        read_only("CREATE TABLE")
    }

    pub fn create_view(&self, _name: &str) -> Result<()> {
        read_only("CREATE VIEW")
    }

    pub fn create_index(&self, _name: &str) -> Result<()> {
        read_only("CREATE INDEX")
    }

    pub fn create_function(&self, _name: &str) -> Result<()> {
        read_only("CREATE FUNCTION")
    }

    pub fn create_sequence(&self, _name: &str) -> Result<()> {
        read_only("CREATE SEQUENCE")
    }

    pub fn create_type(&self, _name: &str) -> Result<()> {
        read_only("CREATE TYPE")
    }

    pub fn create_collation(&self, _name: &str) -> Result<()> {
        read_only("CREATE COLLATION")
    }

    pub fn create_copy_function(&self, _name: &str) -> Result<()> {
        read_only("CREATE COPY FUNCTION")
    }

    pub fn create_pragma_function(&self, _name: &str) -> Result<()> {
        read_only("CREATE PRAGMA FUNCTION")
    }

    pub fn alter(&self, _name: &str) -> Result<()> {
        read_only("ALTER")
    }

    pub fn drop_entry(&self, _name: &str) -> Result<()> {
        read_only("DROP")
    }
}
