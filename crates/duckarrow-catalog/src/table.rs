//! Table entries advertised to the host

use duckarrow_common::{ColumnInfo, ConnectionConfig, LogicalType, Result};
use duckarrow_flight::Pool;
use duckarrow_scan::ScanRegistry;
use std::sync::Arc;

/// A column as advertised to the host, with the remote type string
/// mapped to a host logical type.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogColumn {
    pub name: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
}

/// One remote table, with its column descriptors cached at first lookup.
#[derive(Debug)]
pub struct RemoteTableEntry {
    schema_name: String,
    table_name: String,
    columns: Vec<CatalogColumn>,
    config: ConnectionConfig,
}

impl RemoteTableEntry {
    pub(crate) fn new(
        schema_name: String,
        table_name: String,
        columns: Vec<ColumnInfo>,
        config: ConnectionConfig,
    ) -> Self {
        let columns = columns
            .into_iter()
            .map(|column| CatalogColumn {
                logical_type: LogicalType::from_type_string(&column.type_name),
                name: column.name,
                nullable: column.nullable,
            })
            .collect();
        Self {
            schema_name,
            table_name,
            columns,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.table_name
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn columns(&self) -> &[CatalogColumn] {
        &self.columns
    }

    /// Scans through this entry restrict the remote SELECT to projected
    /// columns.
    pub fn projection_pushdown(&self) -> bool {
        true
    }

    /// Flight SQL result streams are not parallelizable: one worker.
    pub fn max_threads(&self) -> usize {
        1
    }

    /// Bind a scan for this table, drawing a pooled connection with the
    /// catalog's credentials. Returns the scan handle and column count.
    pub async fn begin_scan(
        &self,
        pool: Arc<Pool>,
        registry: &ScanRegistry,
    ) -> Result<(u64, usize)> {
        let schema = (!self.schema_name.is_empty()).then_some(self.schema_name.as_str());
        registry
            .bind(pool, self.config.clone(), schema, &self.table_name)
            .await
    }
}
