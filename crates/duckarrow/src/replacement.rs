//! Virtual-schema table-name rewriter
//!
//! When the host fails to resolve a table in the reserved `duckarrow`
//! schema, the rewriter substitutes a `remote_query(uri, sql)` call with
//! a synthesized single-table SELECT. Host-internal names are left alone
//! and an unset URI declines, letting the reference fall through to the
//! host's normal not-found path.

use duckarrow_common::sql::quote_identifier;
use duckarrow_common::validation::{should_skip_table, validate_table_name};
use duckarrow_common::{GlobalConfig, Result};

/// The reserved schema the rewriter watches.
pub const VIRTUAL_SCHEMA: &str = "duckarrow";

/// The table function substituted for intercepted references.
pub const TABLE_FUNCTION: &str = "remote_query";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementScan {
    pub function_name: &'static str,
    /// `[uri, sql]` arguments for the table function.
    pub parameters: Vec<String>,
}

pub(crate) fn replacement_scan(
    global: &GlobalConfig,
    table_name: &str,
) -> Result<Option<ReplacementScan>> {
    let Some(uri) = global.uri() else {
        return Ok(None);
    };

    // Strip exactly one pair of surrounding quotes. Trimming every quote
    // would turn ""table"" into table instead of "table".
    let name = if table_name.len() >= 2
        && table_name.starts_with('"')
        && table_name.ends_with('"')
    {
        &table_name[1..table_name.len() - 1]
    } else {
        table_name
    };

    if should_skip_table(name) {
        return Ok(None);
    }
    validate_table_name(name)?;

    let query = format!("SELECT * FROM {}", quote_identifier(name));
    tracing::debug!(table = name, "rewriting virtual-schema reference");
    Ok(Some(ReplacementScan {
        function_name: TABLE_FUNCTION,
        parameters: vec![uri, query],
    }))
}
