//! Scalar functions: remote_configure, remote_version, remote_execute

use duckarrow_common::validation::validate_uri;
use duckarrow_common::{ConnectionConfig, DuckArrowError, GlobalConfig, Result};
use duckarrow_flight::Pool;

pub const ENV_USERNAME: &str = "DUCKARROW_USERNAME";
pub const ENV_PASSWORD: &str = "DUCKARROW_PASSWORD";

const CONFIGURE_OK: &str = "DuckArrow configured successfully";

/// 1 MiB cap on pass-through SQL.
const MAX_SQL_LEN: usize = 1024 * 1024;

/// Build-time embedded version string, `dev` when unset.
pub fn version() -> &'static str {
    option_env!("DUCKARROW_VERSION").unwrap_or("dev")
}

/// Parameter > environment > empty. The environment is consulted only
/// when the parameter is the empty string.
fn resolve_credential(parameter: &str, variable: &str) -> String {
    if !parameter.is_empty() {
        return parameter.to_string();
    }
    std::env::var(variable).unwrap_or_default()
}

/// Validate and install the process-wide connection configuration. A
/// null URI produces a null result and leaves the state untouched.
pub(crate) fn configure(
    global: &GlobalConfig,
    uri: Option<&str>,
    username: &str,
    password: &str,
    skip_verify: Option<bool>,
) -> Result<Option<&'static str>> {
    let Some(uri) = uri else {
        return Ok(None);
    };
    validate_uri(uri)?;

    global.set(ConnectionConfig {
        uri: uri.trim().to_string(),
        username: resolve_credential(username, ENV_USERNAME),
        password: resolve_credential(password, ENV_PASSWORD),
        token: None,
        skip_verify: skip_verify.unwrap_or(false),
    });
    tracing::info!("duckarrow configured");
    Ok(Some(CONFIGURE_OK))
}

/// Pass a DDL/DML statement through to the remote. A null statement
/// produces a null result.
pub(crate) async fn execute(
    pool: &Pool,
    global: &GlobalConfig,
    sql: Option<&str>,
) -> Result<Option<i64>> {
    let Some(sql) = sql else {
        return Ok(None);
    };
    if sql.is_empty() {
        return Err(DuckArrowError::InvalidArgument(
            "SQL statement cannot be empty".to_string(),
        ));
    }
    if sql.len() > MAX_SQL_LEN {
        return Err(DuckArrowError::InvalidArgument(
            "SQL statement exceeds maximum length (1MB)".to_string(),
        ));
    }
    if sql.contains('\0') {
        return Err(DuckArrowError::InvalidArgument(
            "SQL statement contains invalid null byte".to_string(),
        ));
    }

    let config = global.snapshot().ok_or_else(|| {
        DuckArrowError::InvalidArgument(
            "not configured - call remote_configure() first".to_string(),
        )
    })?;

    let conn = pool.get(&config).await?;
    let result = conn.client.execute(sql).await;
    pool.release_or_close(&config, &conn);
    result.map(Some)
}
