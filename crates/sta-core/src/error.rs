//! Engine error types.

use std::time::Duration;

use sta_lang::LangError;
use thiserror::Error;

/// Errors produced while answering a request.
#[derive(Debug, Error)]
pub enum Error {
    /// Resource path is malformed or navigates illegally.
    #[error("{0}")]
    InvalidPath(String),

    /// Query option is unknown, malformed or not applicable here.
    #[error("unsupported query option {option}: {message}")]
    UnsupportedQueryOption { option: String, message: String },

    /// `$filter` cannot be parsed or does not type-check.
    #[error("invalid filter expression: {0}")]
    InvalidFilterExpression(String),

    /// The addressed entity, or every entity of a collection, is missing.
    #[error("Not Found")]
    EntityNotFound,

    /// `$expand` nests deeper or wider than configured.
    #[error("expand limit exceeded: {0}")]
    ExpandLimitExceeded(String),

    /// The request ran past its deadline.
    #[error("request exceeded its {}ms execution timeout", .0.as_millis())]
    ExecutionTimeout(Duration),

    /// The store cannot be reached or the pool is exhausted.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store rejected or failed a query.
    #[error("query execution failed: {0}")]
    Execution(String),
}

impl Error {
    /// Create an unsupported query option error.
    pub fn unsupported(option: impl Into<String>, message: impl Into<String>) -> Self {
        Error::UnsupportedQueryOption {
            option: option.into(),
            message: message.into(),
        }
    }

    /// HTTP status code mirroring this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidPath(_)
            | Error::UnsupportedQueryOption { .. }
            | Error::InvalidFilterExpression(_)
            | Error::ExpandLimitExceeded(_) => 400,
            Error::EntityNotFound => 404,
            Error::Execution(_) => 500,
            Error::StoreUnavailable(_) => 503,
            Error::ExecutionTimeout(_) => 504,
        }
    }

    /// Whether the client is at fault.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

impl From<LangError> for Error {
    fn from(err: LangError) -> Self {
        match err {
            LangError::InvalidPath(message) => Error::InvalidPath(message),
            LangError::UnsupportedQueryOption { option, message } => {
                Error::UnsupportedQueryOption { option, message }
            }
            LangError::InvalidFilter { source_text, error } => {
                Error::InvalidFilterExpression(error.format_with_source(&source_text))
            }
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => Error::StoreUnavailable(err.to_string()),
            other => Error::Execution(other.to_string()),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
