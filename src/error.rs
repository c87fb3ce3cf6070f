//! Error types for the pglease driver.
//!
//! All errors are defined with `thiserror` for ergonomic error handling.
//! Resource-state errors (closed pool, closed connection) are raised before
//! any backend round-trip is attempted; backend errors surface to the caller
//! without retry.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Invalid statement: {message}")]
    InvalidStatement {
        message: String,
        /// e.g. "42601" for a syntax error
        sql_state: Option<String>,
    },

    #[error("Pool exhausted: no connection became available within {wait_secs}s")]
    PoolExhausted { wait_secs: u64 },

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Unsupported operation: {operation} - {reason}")]
    UnsupportedOperation { operation: String, reason: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Failed to decode row value: {message}")]
    Decode { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DriverError {
    /// Create an invalid statement error with an optional SQLSTATE code.
    pub fn invalid_statement(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::InvalidStatement {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(wait_secs: u64) -> Self {
        Self::PoolExhausted { wait_secs }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Get the SQLSTATE code for this error, if the backend reported one.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::InvalidStatement { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is retryable by the caller.
    ///
    /// The driver itself never retries; this only classifies for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::PoolExhausted { .. })
    }
}

/// Convert sqlx errors into the driver taxonomy.
impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DriverError::configuration(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DriverError::invalid_statement(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DriverError::invalid_statement("No rows returned", None),
            sqlx::Error::PoolTimedOut => DriverError::pool_exhausted(30),
            sqlx::Error::PoolClosed => DriverError::PoolClosed,
            sqlx::Error::Io(io_err) => DriverError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DriverError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DriverError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DriverError::decode(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DriverError::decode(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DriverError::decode(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DriverError::decode(source.to_string()),
            sqlx::Error::TypeNotFound { type_name } => {
                DriverError::decode(format!("Type not found: {}", type_name))
            }
            sqlx::Error::WorkerCrashed => DriverError::internal("Database worker crashed"),
            _ => DriverError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;
