//! Error types for pg-txn.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants follow the lifecycle of the client: configuration and connectivity
//! failures at startup, migration failures, and the three distinct ways a
//! transaction can end badly (work failure, rollback failure, commit failure).

use sqlx::error::ErrorKind;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23505" for unique violation
        sql_state: Option<String>,
        /// Name of the violated constraint, when the server reported one.
        constraint: Option<String>,
        suggestion: String,
    },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Commit failed: {message}")]
    Commit {
        message: String,
        sql_state: Option<String>,
    },

    /// The work unit failed and the rollback issued in response failed too.
    /// The connection may be left in an indeterminate state.
    #[error("Transaction failed: {cause}; rollback also failed: {rollback}")]
    RollbackFailed {
        #[source]
        cause: Box<DbError>,
        rollback: Box<DbError>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            constraint: None,
            suggestion: suggestion.into(),
        }
    }

    /// Create a constraint violation error.
    pub fn constraint_violation(
        message: impl Into<String>,
        sql_state: Option<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            constraint: Some(constraint.into()),
            suggestion: "The statement violates a table constraint".to_string(),
        }
    }

    /// Create a migration error.
    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration {
            message: message.into(),
        }
    }

    /// Create a commit error from the driver failure.
    pub fn commit(err: sqlx::Error) -> Self {
        let sql_state = match &err {
            sqlx::Error::Database(db_err) => db_err.code().map(|c| c.to_string()),
            _ => None,
        };
        Self::Commit {
            message: err.to_string(),
            sql_state,
        }
    }

    /// Combine a work failure with the failure of the rollback that followed it.
    pub fn rollback_failed(cause: DbError, rollback: DbError) -> Self {
        Self::RollbackFailed {
            cause: Box::new(cause),
            rollback: Box::new(rollback),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Convert a driver error raised while waiting on a pool whose acquire
    /// timeout is known, so a pool timeout reports the configured wait.
    pub fn from_pool(err: sqlx::Error, acquire_timeout: Option<Duration>) -> Self {
        match (err, acquire_timeout) {
            (sqlx::Error::PoolTimedOut, Some(waited)) => Self::timeout(
                "connection pool acquire",
                u32::try_from(waited.as_secs()).unwrap_or(u32::MAX),
            ),
            (err, _) => err.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
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
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::RollbackFailed { .. } => {
                Some("Discard the connection; its transaction state is unknown")
            }
            _ => None,
        }
    }

    /// Get the SQLSTATE code reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } | Self::Commit { sql_state, .. } => {
                sql_state.as_deref()
            }
            _ => None,
        }
    }

    /// Name of the violated constraint carried by this error.
    ///
    /// Shorthand for [`constraint_identifier`](crate::db::constraint_identifier).
    pub fn constraint(&self) -> Option<String> {
        Some(crate::db::constraint_identifier(self)).filter(|c| !c.is_empty())
    }

    /// Check if this error is a unique constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        self.sql_state() == Some(UNIQUE_VIOLATION)
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

const UNIQUE_VIOLATION: &str = "23505";

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection settings and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let constraint = db_err.constraint().map(String::from);
                let suggestion = match db_err.kind() {
                    ErrorKind::UniqueViolation => "A row with the same unique key already exists",
                    ErrorKind::ForeignKeyViolation => "The referenced row does not exist",
                    ErrorKind::NotNullViolation => "Provide a value for the non-nullable column",
                    ErrorKind::CheckViolation => "The value fails a CHECK constraint",
                    _ => "Check the SQL syntax and referenced objects",
                };
                DbError::Database {
                    message: db_err.message().to_string(),
                    sql_state: code,
                    constraint,
                    suggestion: suggestion.to_string(),
                }
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "Increase POSTGRES_TIMEOUT or POSTGRES_OPEN_CONNECTION",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::Migrate(err) => DbError::migration(err.to_string()),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::migration(err.to_string())
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
