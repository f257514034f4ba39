//! Error types for sqlkit.
//!
//! This module defines all error types using `thiserror`. Every variant carries
//! enough context (statement class, argument arity, affected rows) to tell a
//! builder misuse apart from a store-reported fault or a consistency failure.

use thiserror::Error;

/// Broad classification of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Statement construction was misused (pure, never retried).
    Builder,
    /// A row could not be mapped into a record.
    Mapping,
    /// The pool could not hand out a connection.
    Pool,
    /// The store rejected a statement or a connection.
    Store,
    /// A consistency predicate refused to commit.
    Consistency,
    /// A transaction boundary (begin/commit/rollback) failed.
    Transaction,
    /// The caller broke a usage contract (leaked cursor, closed transaction).
    Caller,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection pool exhausted: {max_open} connections in use, waited {waited_ms}ms")]
    PoolExhausted { max_open: u32, waited_ms: u64 },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Connection failed: {message}")]
    Connect { message: String },

    #[error("Execution failed for {class} statement with {arity} argument(s): {message}")]
    Exec {
        class: String,
        arity: usize,
        message: String,
        /// e.g., "23505" for unique violation
        sql_state: Option<String>,
    },

    #[error("Query failed for {class} statement with {arity} argument(s): {message}")]
    Query {
        class: String,
        arity: usize,
        message: String,
        sql_state: Option<String>,
    },

    #[error("No rows returned by {class} statement")]
    NoRows { class: String },

    #[error("Cannot scan column '{column}': expected {expected}, found {found}")]
    Scan {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("Placeholder count mismatch: {placeholders} placeholder(s), {args} argument(s)")]
    ArityMismatch { placeholders: usize, args: usize },

    #[error("Named placeholder ':{name}' has no bound value")]
    UnboundName { name: String },

    #[error("Named argument '{name}' does not appear in the statement")]
    UnknownName { name: String },

    #[error("Cannot expand an empty list into an IN clause (argument {position})")]
    EmptyList { position: usize },

    #[error("Cannot build a batch statement from zero rows")]
    EmptyBatch,

    #[error("Unsupported statement template: {message}")]
    InvalidTemplate { message: String },

    #[error("Failed to begin transaction: {message}")]
    Begin { message: String },

    #[error("Consistency check failed, transaction rolled back: {reason} (rows affected: {rows_affected:?})")]
    ConsistencyViolation {
        reason: String,
        rows_affected: Vec<u64>,
    },

    #[error("Commit failed, transaction state is indeterminate: {message} (transaction: {transaction_id})")]
    Commit {
        message: String,
        transaction_id: String,
    },

    #[error("Rollback failed, transaction state is indeterminate: {message} (transaction: {transaction_id})")]
    Rollback {
        message: String,
        transaction_id: String,
    },

    #[error("Transaction is no longer active: {state} (transaction: {transaction_id})")]
    TransactionInactive {
        state: &'static str,
        transaction_id: String,
    },

    #[error("Row cursor was dropped before it was exhausted or closed; the connection is unusable")]
    ResourceLeak,

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl DbError {
    /// Create a connection error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Create an execution error from a driver error.
    pub fn exec(class: impl Into<String>, arity: usize, err: sqlx::Error) -> Self {
        let sql_state = sql_state(&err);
        Self::Exec {
            class: class.into(),
            arity,
            message: driver_message(&err),
            sql_state,
        }
    }

    /// Create a query error from a driver error.
    pub fn query(class: impl Into<String>, arity: usize, err: sqlx::Error) -> Self {
        let sql_state = sql_state(&err);
        Self::Query {
            class: class.into(),
            arity,
            message: driver_message(&err),
            sql_state,
        }
    }

    /// Create a no-rows error.
    pub fn no_rows(class: impl Into<String>) -> Self {
        Self::NoRows {
            class: class.into(),
        }
    }

    /// Create a scan error.
    pub fn scan(column: impl Into<String>, expected: &'static str, found: impl Into<String>) -> Self {
        Self::Scan {
            column: column.into(),
            expected,
            found: found.into(),
        }
    }

    /// Create an arity mismatch error.
    pub fn arity(placeholders: usize, args: usize) -> Self {
        Self::ArityMismatch { placeholders, args }
    }

    /// Create an invalid template error.
    pub fn invalid_template(message: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            message: message.into(),
        }
    }

    /// Create a begin error.
    pub fn begin(message: impl Into<String>) -> Self {
        Self::Begin {
            message: message.into(),
        }
    }

    /// Create a commit error.
    pub fn commit(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Commit {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a rollback error.
    pub fn rollback(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Rollback {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ArityMismatch { .. }
            | Self::UnboundName { .. }
            | Self::UnknownName { .. }
            | Self::EmptyList { .. }
            | Self::EmptyBatch
            | Self::InvalidTemplate { .. } => ErrorCategory::Builder,
            Self::Scan { .. } => ErrorCategory::Mapping,
            Self::PoolExhausted { .. } | Self::PoolClosed | Self::InvalidConfig { .. } => {
                ErrorCategory::Pool
            }
            Self::Connect { .. }
            | Self::Exec { .. }
            | Self::Query { .. }
            | Self::NoRows { .. }
            | Self::Timeout { .. } => ErrorCategory::Store,
            Self::ConsistencyViolation { .. } => ErrorCategory::Consistency,
            Self::Begin { .. } | Self::Commit { .. } | Self::Rollback { .. } => {
                ErrorCategory::Transaction
            }
            Self::TransactionInactive { .. } | Self::ResourceLeak => ErrorCategory::Caller,
        }
    }

    /// Get the SQLSTATE reported by the store, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Exec { sql_state, .. } | Self::Query { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if the whole operation may be retried from the start.
    ///
    /// Nothing is retried internally; a caller retrying a transaction must
    /// restart it from `begin`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::Connect { .. } | Self::Timeout { .. }
        )
    }
}

fn sql_state(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.to_string()),
        _ => None,
    }
}

fn driver_message(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().to_string(),
        sqlx::Error::Io(io_err) => format!("I/O error: {}", io_err),
        sqlx::Error::Protocol(msg) => format!("Protocol error: {}", msg),
        other => other.to_string(),
    }
}

/// Convert connection-level sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DbError::timeout("connection acquire", 0),
            sqlx::Error::PoolClosed => DbError::PoolClosed,
            sqlx::Error::Configuration(msg) => DbError::invalid_config(msg.to_string()),
            other => DbError::connect(driver_message(&other)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
