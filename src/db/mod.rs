//! Database access layer.
//!
//! This module provides:
//! - Store connections through sqlx's `Any` driver
//! - A bounded connection pool handing out leases
//! - Statement execution and row cursors
//! - Row decoding and record mapping
//! - Transactions with consistency checks

pub mod executor;
#[macro_use]
pub mod macros;
pub mod mapper;
mod params;
pub mod pool;
pub mod store;
pub mod transaction;
pub mod types;

pub use executor::{PreparedStatement, RowCursor, StatementExecutor};
pub use mapper::{FromValue, Record, RecordStream, Row, map, map_all};
pub use pool::{Lease, Pool, PoolStatus};
pub use store::Store;
pub use transaction::{
    ConsistencyCheck, ExactRows, MinRows, NoCheck, Transaction, TxState, run_transaction,
};
