/// Error Module
///
/// This module defines the error taxonomy for sqlbatch. Every failure surfaced
/// by a connection, transaction, batch or row reader maps onto one `DbError`
/// variant, and every variant reports a stable numeric `DbErrorCode`.
use std::fmt;
use thiserror::Error;

/// Stable numeric codes for every error kind.
///
/// The thousands digit groups related failures: 1xxx connections,
/// 2xxx transactions, 3xxx batches, 4xxx command execution, 5xxx value
/// extraction, 6xxx ambient (configuration, I/O, runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DbErrorCode {
    CouldNotOpenConnection = 1000,
    CouldNotCloseConnection = 1001,
    ConnectionBusy = 1002,
    ConnectionClosed = 1003,
    CouldNotBeginTransaction = 2000,
    CouldNotBeginBatch = 3000,
    CouldNotCommitBatch = 3001,
    CouldNotRollbackBatch = 3002,
    BatchClosed = 3003,
    CouldNotExecuteNonQuery = 4000,
    CouldNotExecuteScalar = 4001,
    CouldNotExecuteReader = 4002,
    CouldNotCastValue = 5000,
    FieldNotFound = 5001,
    Configuration = 6000,
    Io = 6001,
    Task = 6002,
}

impl DbErrorCode {
    /// Returns the numeric value of the code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for DbErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Why a connection could not be opened.
#[derive(Error, Debug)]
pub enum OpenCause {
    /// The handle is already open
    #[error("the connection is not currently available to open")]
    Busy,

    /// The driver refused to open the database
    #[error(transparent)]
    Driver(#[from] rusqlite::Error),
}

/// The kind of operation a failed command was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionKind {
    NonQuery,
    Scalar,
    Reader,
}

impl ExecutionKind {
    pub fn code(self) -> DbErrorCode {
        match self {
            ExecutionKind::NonQuery => DbErrorCode::CouldNotExecuteNonQuery,
            ExecutionKind::Scalar => DbErrorCode::CouldNotExecuteScalar,
            ExecutionKind::Reader => DbErrorCode::CouldNotExecuteReader,
        }
    }
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionKind::NonQuery => "non-query",
            ExecutionKind::Scalar => "scalar",
            ExecutionKind::Reader => "reader",
        };
        f.write_str(name)
    }
}

/// Comprehensive error type for sqlbatch.
///
/// This enum covers every failure the layer can surface:
/// - Connection open/close and transaction begin
/// - Batch commit and rollback, and use of a finished batch
/// - Command execution, tagged with the operation kind and SQL text
/// - Typed value extraction from result rows
/// - Configuration loading and runtime plumbing
#[derive(Error, Debug)]
pub enum DbError {
    /// The connection could not be opened (busy or refused by the driver)
    #[error("Could not establish database connection: {cause}")]
    CouldNotOpenConnection {
        #[source]
        cause: OpenCause,
    },

    #[error("Could not close database connection: {0}")]
    CouldNotCloseConnection(#[source] rusqlite::Error),

    #[error("Connection is not open")]
    ConnectionClosed,

    /// `BEGIN` failed, or a command was bound to a transaction that is no longer active
    #[error("Could not begin transaction: {reason}")]
    CouldNotBeginTransaction {
        reason: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// A batch was constructed from handles that are not usable
    #[error("Could not begin batch: {0}")]
    CouldNotBeginBatch(String),

    /// `COMMIT` failed; a compensating rollback has already been attempted
    #[error("Could not commit batch: {0}")]
    CouldNotCommitBatch(#[source] rusqlite::Error),

    #[error("Could not roll back batch: {0}")]
    CouldNotRollbackBatch(#[source] rusqlite::Error),

    /// The batch already reached a terminal state
    #[error("Batch is already {0}")]
    BatchClosed(String),

    /// A command failed while executing
    #[error("Could not execute {kind} command `{sql}`: {source}")]
    Execution {
        kind: ExecutionKind,
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A column value could not be converted to the requested type
    #[error("Could not cast value of field `{field}`: {source}")]
    CouldNotCastValue {
        field: String,
        #[source]
        source: rusqlite::types::FromSqlError,
    },

    #[error("No such field: {0}")]
    FieldNotFound(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task backing the async path panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

impl DbError {
    pub(crate) fn execution(kind: ExecutionKind, sql: &str, source: rusqlite::Error) -> Self {
        DbError::Execution {
            kind,
            sql: sql.to_string(),
            source,
        }
    }

    pub(crate) fn open(cause: impl Into<OpenCause>) -> Self {
        DbError::CouldNotOpenConnection {
            cause: cause.into(),
        }
    }

    /// Returns the stable code for this error.
    pub fn code(&self) -> DbErrorCode {
        match self {
            DbError::CouldNotOpenConnection {
                cause: OpenCause::Busy,
            } => DbErrorCode::ConnectionBusy,
            DbError::CouldNotOpenConnection { .. } => DbErrorCode::CouldNotOpenConnection,
            DbError::CouldNotCloseConnection(_) => DbErrorCode::CouldNotCloseConnection,
            DbError::ConnectionClosed => DbErrorCode::ConnectionClosed,
            DbError::CouldNotBeginTransaction { .. } => DbErrorCode::CouldNotBeginTransaction,
            DbError::CouldNotBeginBatch(_) => DbErrorCode::CouldNotBeginBatch,
            DbError::CouldNotCommitBatch(_) => DbErrorCode::CouldNotCommitBatch,
            DbError::CouldNotRollbackBatch(_) => DbErrorCode::CouldNotRollbackBatch,
            DbError::BatchClosed(_) => DbErrorCode::BatchClosed,
            DbError::Execution { kind, .. } => kind.code(),
            DbError::CouldNotCastValue { .. } => DbErrorCode::CouldNotCastValue,
            DbError::FieldNotFound(_) => DbErrorCode::FieldNotFound,
            DbError::Config(_) => DbErrorCode::Configuration,
            DbError::Io(_) => DbErrorCode::Io,
            DbError::Task(_) => DbErrorCode::Task,
        }
    }

    /// True for failures raised while running a command.
    pub fn is_execution(&self) -> bool {
        matches!(self, DbError::Execution { .. })
    }

    /// The SQL text of a failed command, if this is an execution error.
    pub fn sql(&self) -> Option<&str> {
        match self {
            DbError::Execution { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for DbError {
    fn from(err: toml::de::Error) -> Self {
        DbError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Config(format!("invalid JSON: {}", err))
    }
}

impl From<tokio::task::JoinError> for DbError {
    fn from(err: tokio::task::JoinError) -> Self {
        DbError::Task(err.to_string())
    }
}

/// Type alias for Result to use DbError as the error type.
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::execution(
            ExecutionKind::Scalar,
            "SELECT 1",
            rusqlite::Error::QueryReturnedNoRows,
        );
        assert!(err.to_string().contains("scalar"));
        assert!(err.to_string().contains("SELECT 1"));

        let busy = DbError::open(OpenCause::Busy);
        assert!(busy.to_string().contains("not currently available"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(DbError::open(OpenCause::Busy).code(), DbErrorCode::ConnectionBusy);
        assert_eq!(
            DbError::open(rusqlite::Error::InvalidQuery).code(),
            DbErrorCode::CouldNotOpenConnection
        );
        assert_eq!(DbErrorCode::CouldNotCommitBatch.as_u16(), 3001);

        let reader = DbError::execution(ExecutionKind::Reader, "SELECT", rusqlite::Error::InvalidQuery);
        assert_eq!(reader.code(), DbErrorCode::CouldNotExecuteReader);
        assert_eq!(reader.code().to_string(), "4002");
        assert!(reader.is_execution());
        assert_eq!(reader.sql(), Some("SELECT"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DbError = io_err.into();
        match err {
            DbError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }

        let json_err = serde_json::from_str::<serde_json::Value>("{ invalid json }").unwrap_err();
        let err: DbError = json_err.into();
        assert_eq!(err.code(), DbErrorCode::Configuration);
    }
}
