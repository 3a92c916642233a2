//! DuckArrow common - shared types, errors, validation, and SQL building

pub mod config;
pub mod error;
pub mod sql;
pub mod types;
pub mod validation;

pub use config::{ConnectionConfig, GlobalConfig};
pub use error::{DuckArrowError, Result};
pub use types::{ColumnDescriptor, ColumnInfo, LogicalType, TableInfo};
