//! Statement execution.
//!
//! [`StatementExecutor`] runs statements on a leased connection:
//! - `execute` for mutations, reporting rows affected and the generated id
//! - `query` for a lazy [`RowCursor`]
//! - `query_one`, `fetch_one` and `fetch_all` as conveniences over `query`
//! - `prepare` for a [`PreparedStatement`] run many times with different
//!   arguments
//!
//! Statement text is sent as-is. Statements built with `?` placeholders
//! must be rewritten with [`Pool::rebind`](crate::db::Pool::rebind) before
//! running them on PostgreSQL.

use crate::builder::scan;
use crate::db::mapper::{self, Record, Row};
use crate::db::params::{bind_param, build_query};
use crate::db::pool::{Lease, LeaseState};
use crate::db::types;
use crate::error::{DbError, DbResult};
use crate::models::{BindStyle, DatabaseType, MutationResult, Statement, Value};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use sqlx::any::{AnyQueryResult, AnyRow, AnyStatement};
use sqlx::{AnyConnection, Either, Executor, Statement as _};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Runs statements on leased connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatementExecutor {
    timeout: Option<Duration>,
}

impl StatementExecutor {
    /// Create an executor without a statement timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an executor that fails statements running longer than
    /// `timeout`. A timed-out statement leaves its connection in an unknown
    /// state, so the lease is marked broken.
    ///
    /// For queries the limit applies to each row fetch: to the first row in
    /// `query` and to every later `RowCursor::next`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn bounded<F: Future>(&self, state: &LeaseState, class: &str, fut: F) -> DbResult<F::Output> {
        let Some(limit) = self.timeout else {
            return Ok(fut.await);
        };
        let start = Instant::now();
        match tokio::time::timeout(limit, fut).await {
            Ok(output) => Ok(output),
            Err(_) => {
                state.mark_broken();
                let elapsed_ms = start.elapsed().as_millis() as u64;
                warn!(class = %class, elapsed_ms, "Statement timed out");
                Err(DbError::timeout(format!("{class} statement"), elapsed_ms))
            }
        }
    }

    /// Run a mutation.
    pub async fn execute(&self, lease: &mut Lease, stmt: &Statement) -> DbResult<MutationResult> {
        let class = stmt.class();
        let state = lease.state();
        let db_type = lease.db_type();
        debug!(class = %class, arity = stmt.arity(), "Executing statement");

        let conn = lease.conn_mut()?;
        let result = self
            .bounded(&state, &class, run_execute(conn, stmt))
            .await?
            .map_err(|e| DbError::exec(&class, stmt.arity(), e))?;

        self.finish_mutation(conn, &state, db_type, &class, stmt.arity(), result)
            .await
    }

    /// Build the outcome of a mutation.
    ///
    /// The SQLite backend of the `Any` driver never reports a generated id,
    /// so it is read back with `last_insert_rowid()` on the same connection.
    async fn finish_mutation(
        &self,
        conn: &mut AnyConnection,
        state: &LeaseState,
        db_type: DatabaseType,
        class: &str,
        arity: usize,
        result: AnyQueryResult,
    ) -> DbResult<MutationResult> {
        let mut last_insert_id = result.last_insert_id();
        if last_insert_id.is_none()
            && db_type == DatabaseType::SQLite
            && result.rows_affected() > 0
            && matches!(class, "INSERT" | "REPLACE")
        {
            last_insert_id = self
                .bounded(state, class, sqlite_last_rowid(conn))
                .await?
                .map_err(|e| DbError::exec(class, arity, e))?;
        }

        let outcome = MutationResult {
            rows_affected: result.rows_affected(),
            last_insert_id,
        };
        debug!(
            class = %class,
            rows_affected = outcome.rows_affected,
            last_insert_id = ?outcome.last_insert_id,
            "Statement executed"
        );
        Ok(outcome)
    }

    /// Run a query and return a cursor over its rows.
    ///
    /// The first row is fetched eagerly so that a rejected statement fails
    /// here rather than on the first `next`. The cursor must be exhausted or
    /// closed before the lease runs another statement.
    pub async fn query<'c>(
        &self,
        lease: &'c mut Lease,
        stmt: &'c Statement,
    ) -> DbResult<RowCursor<'c>> {
        let class = stmt.class();
        let state = lease.state();
        debug!(class = %class, arity = stmt.arity(), "Executing query");

        let conn = lease.conn_mut()?;
        let stream = run_fetch(conn, stmt);
        self.open_cursor(stream, state, class, stmt.arity()).await
    }

    async fn open_cursor<'c>(
        &self,
        mut stream: BoxStream<'c, Result<AnyRow, sqlx::Error>>,
        state: Arc<LeaseState>,
        class: String,
        arity: usize,
    ) -> DbResult<RowCursor<'c>> {
        let first = self.bounded(&state, &class, stream.next()).await?;

        let mut cursor = RowCursor {
            stream: None,
            peeked: None,
            columns: None,
            executor: *self,
            state,
            class,
            arity,
        };
        match first {
            Some(Ok(row)) => {
                cursor.peeked = Some(row);
                cursor.stream = Some(stream);
            }
            Some(Err(e)) => return Err(DbError::query(&cursor.class, cursor.arity, e)),
            None => {}
        }
        Ok(cursor)
    }

    /// Run a query and return its first row.
    ///
    /// Fails with [`DbError::NoRows`] when the result is empty. Further rows
    /// are discarded.
    pub async fn query_one(&self, lease: &mut Lease, stmt: &Statement) -> DbResult<Row> {
        let mut cursor = self.query(lease, stmt).await?;
        let row = cursor.next().await;
        cursor.close();
        row?.ok_or_else(|| DbError::no_rows(stmt.class()))
    }

    /// Run a query and map its first row into a record.
    pub async fn fetch_one<R: Record>(&self, lease: &mut Lease, stmt: &Statement) -> DbResult<R> {
        let row = self.query_one(lease, stmt).await?;
        mapper::map(&row)
    }

    /// Run a query and map every row into a record.
    pub async fn fetch_all<R: Record>(
        &self,
        lease: &mut Lease,
        stmt: &Statement,
    ) -> DbResult<Vec<R>> {
        let cursor = self.query(lease, stmt).await?;
        mapper::map_all(cursor).try_collect().await
    }

    /// Prepare `sql` once on the leased connection.
    ///
    /// The text is sent as-is, so it must already use the backend's
    /// placeholder dialect. The returned statement borrows the lease until
    /// it is dropped.
    pub async fn prepare<'c>(
        &self,
        lease: &'c mut Lease,
        sql: &'c str,
    ) -> DbResult<PreparedStatement<'c>> {
        let class = Statement::raw(sql).class();
        let state = lease.state();
        let db_type = lease.db_type();

        let conn = lease.conn_mut()?;
        let statement = self
            .bounded(&state, &class, conn.prepare(sql))
            .await?
            .map_err(|e| DbError::query(&class, 0, e))?;

        let arity = match statement.parameters() {
            Some(Either::Left(types)) => Some(types.len()),
            Some(Either::Right(count)) => Some(count),
            None if db_type.bind_style() == BindStyle::Question => {
                Some(scan::positional_count(&scan::tokenize(sql)))
            }
            None => None,
        };
        debug!(class = %class, arity = ?arity, "Prepared statement");

        Ok(PreparedStatement {
            lease,
            statement,
            executor: *self,
            db_type,
            class,
            arity,
        })
    }
}

async fn sqlite_last_rowid(conn: &mut AnyConnection) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT last_insert_rowid()")
        .fetch_one(conn)
        .await
        .map(Some)
}

async fn run_execute(
    conn: &mut AnyConnection,
    stmt: &Statement,
) -> Result<AnyQueryResult, sqlx::Error> {
    if stmt.args().is_empty() {
        // Unprepared path: lets DDL and multi-statement scripts through.
        conn.execute(stmt.text()).await
    } else {
        build_query(stmt).execute(conn).await
    }
}

fn run_fetch<'c>(
    conn: &'c mut AnyConnection,
    stmt: &'c Statement,
) -> BoxStream<'c, Result<AnyRow, sqlx::Error>> {
    if stmt.args().is_empty() {
        conn.fetch(stmt.text())
    } else {
        build_query(stmt).fetch(conn)
    }
}

/// Forward-only cursor over the rows of a query.
///
/// A cursor must be read to the end or [`close`](RowCursor::close)d. Dropping
/// it earlier taints its lease: later statements on the lease fail with
/// [`DbError::ResourceLeak`] and the connection is discarded on release.
pub struct RowCursor<'c> {
    stream: Option<BoxStream<'c, Result<AnyRow, sqlx::Error>>>,
    peeked: Option<AnyRow>,
    columns: Option<Arc<[String]>>,
    executor: StatementExecutor,
    state: Arc<LeaseState>,
    class: String,
    arity: usize,
}

impl RowCursor<'_> {
    /// Next row, or `None` once the result set is exhausted.
    ///
    /// A store or decoding error ends the cursor.
    pub async fn next(&mut self) -> DbResult<Option<Row>> {
        let raw = match self.peeked.take() {
            Some(row) => row,
            None => {
                let Some(stream) = self.stream.as_mut() else {
                    return Ok(None);
                };
                let fetched = self
                    .executor
                    .bounded(&self.state, &self.class, stream.next())
                    .await;
                match fetched {
                    Err(e) => {
                        self.stream = None;
                        return Err(e);
                    }
                    Ok(Some(Ok(row))) => row,
                    Ok(Some(Err(e))) => {
                        self.stream = None;
                        return Err(DbError::query(&self.class, self.arity, e));
                    }
                    Ok(None) => {
                        self.stream = None;
                        return Ok(None);
                    }
                }
            }
        };

        let columns = self
            .columns
            .get_or_insert_with(|| types::column_names(&raw))
            .clone();
        match types::decode_row(&raw) {
            Ok(values) => Ok(Some(Row::new(columns, values))),
            Err(e) => {
                self.finish();
                Err(e)
            }
        }
    }

    /// Collect the remaining rows.
    pub async fn collect_rows(mut self) -> DbResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Whether every row has been read.
    pub fn is_exhausted(&self) -> bool {
        self.stream.is_none() && self.peeked.is_none()
    }

    /// Discard any remaining rows.
    pub fn close(mut self) {
        self.finish();
    }

    pub(crate) fn finish(&mut self) {
        self.peeked = None;
        self.stream = None;
    }
}

impl Drop for RowCursor<'_> {
    fn drop(&mut self) {
        if !self.is_exhausted() {
            self.state.mark_leaked();
            warn!(
                class = %self.class,
                arity = self.arity,
                "Row cursor dropped before it was exhausted or closed, connection will be discarded"
            );
        }
    }
}

impl std::fmt::Debug for RowCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowCursor")
            .field("class", &self.class)
            .field("arity", &self.arity)
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}

/// A statement prepared once on a leased connection and run with different
/// argument sets.
pub struct PreparedStatement<'c> {
    lease: &'c mut Lease,
    statement: AnyStatement<'c>,
    executor: StatementExecutor,
    db_type: DatabaseType,
    class: String,
    arity: Option<usize>,
}

impl PreparedStatement<'_> {
    /// Number of parameters, when the backend reports it.
    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    fn check_arity(&self, args: &[Value]) -> DbResult<()> {
        match self.arity {
            Some(expected) if expected != args.len() => Err(DbError::arity(expected, args.len())),
            _ => Ok(()),
        }
    }

    /// Run the statement as a mutation with `args`.
    pub async fn execute(&mut self, args: &[Value]) -> DbResult<MutationResult> {
        self.check_arity(args)?;
        let state = self.lease.state();
        debug!(class = %self.class, arity = args.len(), "Executing prepared statement");

        let conn = self.lease.conn_mut()?;
        let query = args.iter().fold(self.statement.query(), bind_param);
        let result = self
            .executor
            .bounded(&state, &self.class, query.execute(&mut *conn))
            .await?
            .map_err(|e| DbError::exec(&self.class, args.len(), e))?;

        self.executor
            .finish_mutation(conn, &state, self.db_type, &self.class, args.len(), result)
            .await
    }

    /// Run the statement as a query with `args` and return a cursor.
    ///
    /// The cursor must be exhausted or closed before the statement runs
    /// again.
    pub async fn query<'s>(&'s mut self, args: &'s [Value]) -> DbResult<RowCursor<'s>> {
        self.check_arity(args)?;
        let state = self.lease.state();
        debug!(class = %self.class, arity = args.len(), "Querying prepared statement");

        let conn = self.lease.conn_mut()?;
        let stream = args
            .iter()
            .fold(self.statement.query(), bind_param)
            .fetch(conn);
        self.executor
            .open_cursor(stream, state, self.class.clone(), args.len())
            .await
    }
}

impl std::fmt::Debug for PreparedStatement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("class", &self.class)
            .field("arity", &self.arity)
            .finish()
    }
}
