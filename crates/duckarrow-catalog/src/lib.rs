//! DuckArrow catalog - attached remote databases as a browseable,
//! read-only catalog

pub mod catalog;
pub mod schema;
pub mod table;
pub mod transaction;

pub use catalog::{AttachOptions, RemoteCatalog};
pub use schema::{OnEntryNotFound, RemoteSchemaEntry};
pub use table::{CatalogColumn, RemoteTableEntry};
pub use transaction::{TransactionManager, TransactionTicket};

use duckarrow_common::{DuckArrowError, Result};

/// Every write path fails the same way; the attached database is
/// read-only through the catalog.
pub(crate) fn read_only<T>(operation: &str) -> Result<T> {
    Err(DuckArrowError::NotImplemented(format!(
        "{operation} is not supported: the attached Flight SQL database is read-only"
    )))
}
