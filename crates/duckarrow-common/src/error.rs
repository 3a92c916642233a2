//! DuckArrow error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DuckArrowError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("connect error: {0}")]
    Connect(String),

    #[error("statement create error: {0}")]
    StatementCreate(String),

    #[error("execute error: {0}")]
    Execute(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("{0}")]
    Function(String),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl DuckArrowError {
    /// The message without the error-kind framing. Function-level errors
    /// surfaced to the host carry only the function prefix and this text.
    pub fn message(&self) -> String {
        match self {
            Self::InvalidArgument(m)
            | Self::Connect(m)
            | Self::StatementCreate(m)
            | Self::Execute(m)
            | Self::Remote(m)
            | Self::Transport(m)
            | Self::NotFound(m)
            | Self::NotImplemented(m)
            | Self::Function(m) => m.clone(),
            Self::Arrow(e) => e.to_string(),
        }
    }

    /// Wrap an error for reporting through a scalar function, e.g.
    /// `remote_execute: table name contains invalid characters`.
    pub fn function(name: &str, err: DuckArrowError) -> DuckArrowError {
        DuckArrowError::Function(format!("{name}: {}", err.message()))
    }
}

pub type Result<T> = std::result::Result<T, DuckArrowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_error_strips_kind_framing() {
        let err = DuckArrowError::InvalidArgument(
            "URI must start with grpc:// or grpc+tls://".to_string(),
        );
        let wrapped = DuckArrowError::function("remote_configure", err);
        assert_eq!(
            wrapped.to_string(),
            "remote_configure: URI must start with grpc:// or grpc+tls://"
        );
    }

    #[test]
    fn remote_error_keeps_server_message() {
        let err = DuckArrowError::Remote("table does not exist".to_string());
        let wrapped = DuckArrowError::function("remote_execute", err);
        assert_eq!(wrapped.to_string(), "remote_execute: table does not exist");
    }
}
