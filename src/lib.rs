//! sqlkit
//!
//! A relational data-access core over PostgreSQL, MySQL and SQLite:
//! statement building with positional and named placeholders, a bounded
//! connection pool, row-to-record mapping and transactions that refuse to
//! commit when a consistency check fails.

pub mod builder;
pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::PoolConfig;
pub use db::{
    ConsistencyCheck, ExactRows, Lease, MinRows, Pool, PreparedStatement, Record, Row, RowCursor,
    StatementExecutor, Transaction, run_transaction,
};
pub use error::{DbError, DbResult, ErrorCategory};
pub use models::{BindStyle, DatabaseType, MutationResult, Statement, Value};
