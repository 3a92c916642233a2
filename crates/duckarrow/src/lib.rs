//! DuckArrow - query a remote Arrow Flight SQL service as if it were
//! local.
//!
//! The host-facing SQL surface:
//!
//! ```sql
//! SELECT remote_configure('grpc+tls://host:31337', 'user', 'pass');
//! SELECT * FROM duckarrow."RemoteTable";
//! SELECT * FROM remote_query('grpc://host:31337', 'SELECT * FROM "t"');
//! ATTACH 'grpc://host:31337' AS remote (TYPE duckarrow, username 'u');
//! SELECT remote_execute('DROP TABLE "t"');
//! SELECT remote_version();
//! ```
//!
//! [`DuckArrow`] is the capability set the host's ABI plumbing drives:
//! scalar functions, the replacement scan, attach/detach, and the
//! bind/init/next/free scan lifecycle over opaque integer handles.

pub mod extension;
mod functions;
pub mod replacement;

pub use extension::DuckArrow;
pub use functions::{version, ENV_PASSWORD, ENV_USERNAME};
pub use replacement::{ReplacementScan, TABLE_FUNCTION, VIRTUAL_SCHEMA};

pub use duckarrow_catalog::{
    AttachOptions, CatalogColumn, OnEntryNotFound, RemoteCatalog, RemoteSchemaEntry,
    RemoteTableEntry, TransactionManager, TransactionTicket,
};
pub use duckarrow_common::{
    ColumnDescriptor, ColumnInfo, ConnectionConfig, DuckArrowError, GlobalConfig, LogicalType,
    Result, TableInfo,
};
pub use duckarrow_flight::{ConnectionResult, FlightClient, Pool, QueryReader, Statement};
pub use duckarrow_scan::{DataChunk, ScanRegistry, ScanState, TableScan, Vector, VectorData,
    VECTOR_SIZE};
