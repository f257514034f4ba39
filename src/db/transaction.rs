//! Transactions.
//!
//! A [`Transaction`] owns one lease from `BEGIN` until it commits, rolls
//! back, or is dropped. Every mutation it runs is recorded so a
//! [`ConsistencyCheck`] can decide whether the transaction may commit.
//!
//! Failure handling:
//! - a failed step rolls the transaction back before the error surfaces
//! - a failed consistency check rolls back and reports the row counts
//! - dropping an active transaction schedules a rollback
//! - [`run_transaction`] also rolls back when the body panics

use crate::db::executor::StatementExecutor;
use crate::db::mapper::{Record, Row};
use crate::db::pool::{Lease, Pool};
use crate::error::{DbError, DbResult};
use crate::models::{MutationResult, Statement};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::panic::AssertUnwindSafe;
use tracing::{debug, info, warn};

/// Transaction lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
    /// A commit or rollback failed; the store decides the outcome.
    Indeterminate,
}

impl TxState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Indeterminate => "indeterminate",
        }
    }
}

/// Predicate over the outcomes of a transaction's steps, evaluated before
/// commit.
pub trait ConsistencyCheck {
    /// `Err(reason)` vetoes the commit.
    fn verify(&self, outcomes: &[MutationResult]) -> Result<(), String>;
}

/// Every step must affect exactly `n` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExactRows(pub u64);

impl ConsistencyCheck for ExactRows {
    fn verify(&self, outcomes: &[MutationResult]) -> Result<(), String> {
        match outcomes.iter().position(|o| o.rows_affected != self.0) {
            Some(i) => Err(format!(
                "step {} affected {} row(s), expected exactly {}",
                i + 1,
                outcomes[i].rows_affected,
                self.0
            )),
            None => Ok(()),
        }
    }
}

/// Every step must affect at least `n` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinRows(pub u64);

impl ConsistencyCheck for MinRows {
    fn verify(&self, outcomes: &[MutationResult]) -> Result<(), String> {
        match outcomes.iter().position(|o| o.rows_affected < self.0) {
            Some(i) => Err(format!(
                "step {} affected {} row(s), expected at least {}",
                i + 1,
                outcomes[i].rows_affected,
                self.0
            )),
            None => Ok(()),
        }
    }
}

/// Accepts any outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheck;

impl ConsistencyCheck for NoCheck {
    fn verify(&self, _outcomes: &[MutationResult]) -> Result<(), String> {
        Ok(())
    }
}

impl<F> ConsistencyCheck for F
where
    F: Fn(&[MutationResult]) -> bool,
{
    fn verify(&self, outcomes: &[MutationResult]) -> Result<(), String> {
        if self(outcomes) {
            Ok(())
        } else {
            Err("consistency predicate rejected the step outcomes".to_string())
        }
    }
}

/// An open transaction bound to one leased connection.
pub struct Transaction {
    id: String,
    lease: Option<Lease>,
    state: TxState,
    outcomes: Vec<MutationResult>,
    executor: StatementExecutor,
}

impl Transaction {
    /// Lease a connection and start a transaction on it.
    pub async fn begin(pool: &Pool) -> DbResult<Self> {
        Self::begin_with(pool, StatementExecutor::new()).await
    }

    /// Like [`begin`](Self::begin), running steps through `executor`.
    pub async fn begin_with(pool: &Pool, executor: StatementExecutor) -> DbResult<Self> {
        let mut lease = pool
            .acquire()
            .await
            .map_err(|e| DbError::begin(e.to_string()))?;

        if let Err(e) = lease.run_control("BEGIN").await {
            lease.mark_broken();
            return Err(DbError::begin(e.to_string()));
        }

        let id = generate_transaction_id();
        info!(transaction_id = %id, db_type = %lease.db_type(), "Transaction started");

        Ok(Self {
            id,
            lease: Some(lease),
            state: TxState::Active,
            outcomes: Vec::new(),
            executor,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Outcomes of the steps run so far, in order.
    pub fn outcomes(&self) -> &[MutationResult] {
        &self.outcomes
    }

    fn inactive(&self) -> DbError {
        DbError::TransactionInactive {
            state: self.state.as_str(),
            transaction_id: self.id.clone(),
        }
    }

    fn active_lease(&mut self) -> DbResult<&mut Lease> {
        if self.state != TxState::Active {
            return Err(self.inactive());
        }
        match self.lease.as_mut() {
            Some(lease) => Ok(lease),
            None => Err(DbError::TransactionInactive {
                state: self.state.as_str(),
                transaction_id: self.id.clone(),
            }),
        }
    }

    /// Run a mutation inside the transaction.
    ///
    /// On failure the transaction is rolled back and the original error is
    /// returned.
    pub async fn step(&mut self, stmt: &Statement) -> DbResult<MutationResult> {
        let executor = self.executor;
        let lease = self.active_lease()?;
        match executor.execute(lease, stmt).await {
            Ok(outcome) => {
                self.outcomes.push(outcome);
                debug!(
                    transaction_id = %self.id,
                    step = self.outcomes.len(),
                    rows_affected = outcome.rows_affected,
                    "Transaction step executed"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(transaction_id = %self.id, error = %err, "Transaction step failed, rolling back");
                self.abort().await;
                Err(err)
            }
        }
    }

    /// Read one row inside the transaction.
    pub async fn query_one(&mut self, stmt: &Statement) -> DbResult<Row> {
        let executor = self.executor;
        let lease = self.active_lease()?;
        let result = executor.query_one(lease, stmt).await;
        self.abort_on_store_error(result).await
    }

    /// Read one record inside the transaction.
    pub async fn fetch_one<R: Record>(&mut self, stmt: &Statement) -> DbResult<R> {
        let executor = self.executor;
        let lease = self.active_lease()?;
        let result = executor.fetch_one(lease, stmt).await;
        self.abort_on_store_error(result).await
    }

    /// Read every matching record inside the transaction.
    pub async fn fetch_all<R: Record>(&mut self, stmt: &Statement) -> DbResult<Vec<R>> {
        let executor = self.executor;
        let lease = self.active_lease()?;
        let result = executor.fetch_all(lease, stmt).await;
        self.abort_on_store_error(result).await
    }

    async fn abort_on_store_error<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        if let Err(err) = &result {
            if matches!(err, DbError::Query { .. } | DbError::Timeout { .. }) {
                warn!(transaction_id = %self.id, error = %err, "Transaction read failed, rolling back");
                self.abort().await;
            }
        }
        result
    }

    /// Roll back after a failed statement, logging rather than returning a
    /// rollback failure so the statement error is the one surfaced.
    async fn abort(&mut self) {
        if let Err(e) = self.end("ROLLBACK").await {
            warn!(transaction_id = %self.id, error = %e, "Automatic rollback failed");
        }
    }

    /// Run COMMIT or ROLLBACK and release the lease.
    async fn end(&mut self, control: &'static str) -> DbResult<()> {
        if self.state != TxState::Active {
            return Err(self.inactive());
        }
        let Some(mut lease) = self.lease.take() else {
            return Err(self.inactive());
        };

        let committing = control == "COMMIT";
        match lease.run_control(control).await {
            Ok(()) => {
                self.state = if committing {
                    TxState::Committed
                } else {
                    TxState::RolledBack
                };
                lease.release();
                info!(
                    transaction_id = %self.id,
                    steps = self.outcomes.len(),
                    "Transaction {}",
                    self.state.as_str()
                );
                Ok(())
            }
            Err(e) => {
                self.state = TxState::Indeterminate;
                lease.mark_broken();
                let message = e.to_string();
                warn!(transaction_id = %self.id, error = %message, "{} failed", control);
                if committing {
                    Err(DbError::commit(message, self.id.clone()))
                } else {
                    Err(DbError::rollback(message, self.id.clone()))
                }
            }
        }
    }

    /// Commit and release the connection.
    ///
    /// A failed commit is not retried: the connection is discarded and the
    /// transaction's outcome is left to the store.
    pub async fn commit(mut self) -> DbResult<()> {
        self.end("COMMIT").await
    }

    /// Roll back and release the connection.
    ///
    /// Rolling back a transaction that a failed step already rolled back is
    /// a no-op.
    pub async fn rollback(mut self) -> DbResult<()> {
        if self.state == TxState::RolledBack {
            return Ok(());
        }
        self.end("ROLLBACK").await
    }

    /// Commit if `check` accepts the step outcomes, otherwise roll back.
    ///
    /// Returns the step outcomes on success. A vetoed commit fails with
    /// [`DbError::ConsistencyViolation`] carrying each step's row count.
    pub async fn commit_checked<C>(mut self, check: &C) -> DbResult<Vec<MutationResult>>
    where
        C: ConsistencyCheck + ?Sized,
    {
        if self.state != TxState::Active {
            return Err(self.inactive());
        }

        if let Err(reason) = check.verify(&self.outcomes) {
            let rows_affected: Vec<u64> = self.outcomes.iter().map(|o| o.rows_affected).collect();
            warn!(
                transaction_id = %self.id,
                reason = %reason,
                rows_affected = ?rows_affected,
                "Consistency check failed, rolling back"
            );
            self.end("ROLLBACK").await?;
            return Err(DbError::ConsistencyViolation {
                reason,
                rows_affected,
            });
        }

        self.end("COMMIT").await?;
        Ok(std::mem::take(&mut self.outcomes))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state != TxState::Active {
            return;
        }
        let Some(mut lease) = self.lease.take() else {
            return;
        };
        self.state = TxState::RolledBack;
        let id = std::mem::take(&mut self.id);

        // Stays broken unless the rollback below completes, so a task that
        // never runs still discards the connection.
        lease.mark_broken();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(transaction_id = %id, "Active transaction dropped, rolling back");
                handle.spawn(async move {
                    match lease.run_control("ROLLBACK").await {
                        Ok(()) => {
                            lease.clear_broken();
                            debug!(transaction_id = %id, "Dropped transaction rolled back");
                        }
                        Err(e) => {
                            warn!(transaction_id = %id, error = %e, "Rollback of dropped transaction failed");
                        }
                    }
                    lease.release();
                });
            }
            Err(_) => {
                warn!(
                    transaction_id = %id,
                    "Active transaction dropped outside a runtime, discarding connection"
                );
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("steps", &self.outcomes.len())
            .finish()
    }
}

/// Run `body` in a transaction, then commit if `check` accepts the steps.
///
/// - `Ok` commits through [`Transaction::commit_checked`]
/// - `Err` rolls back and returns the body's error
/// - a panic rolls back and then resumes the panic
///
/// ```ignore
/// let id = run_transaction(&pool, &ExactRows(1), |tx| {
///     Box::pin(async move {
///         tx.step(&debit).await?;
///         tx.step(&credit).await?;
///         Ok(())
///     })
/// })
/// .await?;
/// ```
pub async fn run_transaction<C, F, T>(pool: &Pool, check: &C, body: F) -> DbResult<T>
where
    C: ConsistencyCheck + ?Sized,
    F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, DbResult<T>>,
{
    let mut tx = Transaction::begin(pool).await?;
    let outcome = AssertUnwindSafe(body(&mut tx)).catch_unwind().await;

    match outcome {
        Ok(Ok(value)) => {
            tx.commit_checked(check).await?;
            Ok(value)
        }
        Ok(Err(err)) => {
            if let Err(e) = tx.rollback().await {
                if !matches!(e, DbError::TransactionInactive { .. }) {
                    warn!(error = %e, "Rollback after failed transaction body failed");
                }
            }
            Err(err)
        }
        Err(panic) => {
            warn!(transaction_id = %tx.id(), "Transaction body panicked, rolling back");
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "Rollback after panic failed");
            }
            std::panic::resume_unwind(panic)
        }
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
