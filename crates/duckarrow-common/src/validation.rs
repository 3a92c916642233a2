//! Input validation for table names and connection URIs
//!
//! Table references and URIs arrive from user SQL and are interpolated
//! (quoted) into queries sent to a remote server, so both are validated
//! before any remote call is made.

use crate::error::{DuckArrowError, Result};

const MAX_TABLE_NAME_LEN: usize = 255;
const MAX_URI_LEN: usize = 2048;

/// Patterns that could break out of a quoted identifier on the remote
/// server even after quoting.
const FORBIDDEN_PATTERNS: &[&str] = &[";", "--", "/*", "*/", "\0", "\n", "\r", "\t"];

/// Table-name prefixes the rewriter must leave to the host: host-internal
/// catalogs, other extensions' namespaces, and partner-tool cache tables.
const SKIP_TABLE_PREFIXES: &[&str] = &[
    "pg_",
    "sqlite_",
    "information_schema",
    "__",
    "mdclientcache_",
];

/// Check that a table name is safe to embed (quoted) in remote SQL.
/// Unicode, spaces, quotes, and backslashes are allowed; they are escaped
/// at use.
pub fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DuckArrowError::InvalidArgument(
            "table name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_TABLE_NAME_LEN {
        return Err(DuckArrowError::InvalidArgument(
            "table name exceeds maximum length of 255 characters".to_string(),
        ));
    }
    if FORBIDDEN_PATTERNS.iter().any(|p| name.contains(p)) {
        return Err(DuckArrowError::InvalidArgument(
            "table name contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Validate a connection URI: `grpc://` or `grpc+tls://` scheme followed
/// by a non-empty host authority.
pub fn validate_uri(uri: &str) -> Result<()> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(DuckArrowError::InvalidArgument(
            "URI cannot be empty".to_string(),
        ));
    }
    if uri.len() > MAX_URI_LEN {
        return Err(DuckArrowError::InvalidArgument(
            "URI exceeds maximum length of 2048 characters".to_string(),
        ));
    }

    let rest = if let Some(rest) = uri.strip_prefix("grpc+tls://") {
        rest
    } else if let Some(rest) = uri.strip_prefix("grpc://") {
        rest
    } else {
        return Err(DuckArrowError::InvalidArgument(
            "URI must start with grpc:// or grpc+tls://".to_string(),
        ));
    };

    if rest.is_empty() {
        return Err(DuckArrowError::InvalidArgument(
            "URI must include a host".to_string(),
        ));
    }

    let authority = rest.split('/').next().unwrap_or_default();
    let (host, port) = split_authority(authority);
    if host.is_empty() {
        return Err(DuckArrowError::InvalidArgument(
            "URI must include a valid host".to_string(),
        ));
    }
    if let Some(port) = port {
        if port.parse::<u16>().is_err() {
            return Err(DuckArrowError::InvalidArgument(
                "URI must include a valid host".to_string(),
            ));
        }
    }
    Ok(())
}

/// Split `host[:port]`, tolerating bracketed IPv6 literals.
pub fn split_authority(authority: &str) -> (&str, Option<&str>) {
    if let Some(rest) = authority.strip_prefix('[') {
        match rest.split_once(']') {
            Some((host, tail)) => match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => (host, None),
            },
            None => ("", None),
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    }
}

/// True for tables the replacement scan must not intercept.
pub fn should_skip_table(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SKIP_TABLE_PREFIXES.iter().any(|p| lower.starts_with(p))
}
