//! Transaction boundaries, consistency checks and rollback guarantees.

use sqlkit::builder::{NamedArgs, bind_named, bind_positional};
use sqlkit::db::{NoCheck, TxState};
use sqlkit::{
    DbError, ErrorCategory, ExactRows, MinRows, MutationResult, Pool, PoolConfig, Statement,
    StatementExecutor, Transaction, run_transaction,
};
use std::time::Duration;
use tempfile::NamedTempFile;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn setup() -> (Pool, NamedTempFile) {
    init_tracing();
    let temp_file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}?mode=rwc", temp_file.path().display());
    let pool = Pool::connect(PoolConfig::new(url, 2, 2, Duration::from_secs(5)))
        .await
        .unwrap();

    let exec = StatementExecutor::new();
    let mut lease = pool.acquire().await.unwrap();
    for sql in [
        "CREATE TABLE account (id INTEGER PRIMARY KEY, owner TEXT NOT NULL UNIQUE, balance INTEGER NOT NULL)",
        "INSERT INTO account (id, owner, balance) VALUES (1, 'ann', 100), (2, 'bob', 50)",
    ] {
        exec.execute(&mut lease, &Statement::raw(sql)).await.unwrap();
    }
    lease.release();
    (pool, temp_file)
}

async fn balances(pool: &Pool) -> Vec<(i64, i64)> {
    let exec = StatementExecutor::new();
    let mut lease = pool.acquire().await.unwrap();
    let stmt = Statement::raw("SELECT id, balance FROM account ORDER BY id");
    let rows = exec
        .query(&mut lease, &stmt)
        .await
        .unwrap()
        .collect_rows()
        .await
        .unwrap();
    rows.iter()
        .map(|r| (r.get("id").unwrap(), r.get("balance").unwrap()))
        .collect()
}

fn adjust(id: i64, delta: i64) -> Statement {
    let args = NamedArgs::new().with("id", id).with("delta", delta);
    bind_named(
        "UPDATE account SET balance = balance + :delta WHERE id = :id",
        &args,
    )
    .unwrap()
}

#[tokio::test]
async fn test_commit_applies_steps() {
    let (pool, _file) = setup().await;

    let mut tx = Transaction::begin(&pool).await.unwrap();
    assert!(tx.id().starts_with("tx_"));
    assert_eq!(tx.state(), TxState::Active);
    tx.step(&adjust(1, -30)).await.unwrap();
    tx.step(&adjust(2, 30)).await.unwrap();
    let outcomes = tx.commit_checked(&ExactRows(1)).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(balances(&pool).await, vec![(1, 70), (2, 80)]);
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn test_consistency_violation_rolls_back() {
    let (pool, _file) = setup().await;

    let mut tx = Transaction::begin(&pool).await.unwrap();
    let first = tx.step(&adjust(1, -30)).await.unwrap();
    assert_eq!(first.rows_affected, 1);
    // No account 99: affects zero rows.
    let second = tx.step(&adjust(99, 30)).await.unwrap();
    assert_eq!(second.rows_affected, 0);

    let err = tx.commit_checked(&ExactRows(1)).await.unwrap_err();
    match &err {
        DbError::ConsistencyViolation { rows_affected, .. } => {
            assert_eq!(rows_affected, &vec![1, 0]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.category(), ErrorCategory::Consistency);

    assert_eq!(balances(&pool).await, vec![(1, 100), (2, 50)]);
}

#[tokio::test]
async fn test_custom_predicate() {
    let (pool, _file) = setup().await;

    let mut tx = Transaction::begin(&pool).await.unwrap();
    tx.step(&Statement::raw("UPDATE account SET balance = 0")).await.unwrap();
    let two_rows = |outcomes: &[MutationResult]| {
        outcomes.iter().map(|o| o.rows_affected).sum::<u64>() == 2
    };
    tx.commit_checked(&two_rows).await.unwrap();
    assert_eq!(balances(&pool).await, vec![(1, 0), (2, 0)]);

    let mut tx = Transaction::begin(&pool).await.unwrap();
    tx.step(&adjust(1, 5)).await.unwrap();
    let err = tx.commit_checked(&MinRows(2)).await.unwrap_err();
    assert!(matches!(err, DbError::ConsistencyViolation { .. }));
    assert_eq!(balances(&pool).await, vec![(1, 0), (2, 0)]);
}

#[tokio::test]
async fn test_failed_step_rolls_back_and_closes_transaction() {
    let (pool, _file) = setup().await;

    let mut tx = Transaction::begin(&pool).await.unwrap();
    tx.step(&adjust(1, -30)).await.unwrap();

    let duplicate = bind_positional(
        "INSERT INTO account (owner, balance) VALUES (?, ?)",
        [sqlkit::Value::from("bob"), sqlkit::Value::from(1)],
    )
    .unwrap();
    let err = tx.step(&duplicate).await.unwrap_err();
    assert!(matches!(err, DbError::Exec { ref class, .. } if class == "INSERT"));
    assert_eq!(tx.state(), TxState::RolledBack);

    let err = tx.step(&adjust(2, 1)).await.unwrap_err();
    assert!(matches!(err, DbError::TransactionInactive { .. }));

    tx.rollback().await.unwrap();
    assert_eq!(balances(&pool).await, vec![(1, 100), (2, 50)]);
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn test_commit_after_rollback_is_inactive() {
    let (pool, _file) = setup().await;

    let mut tx = Transaction::begin(&pool).await.unwrap();
    let _ = tx.step(&Statement::raw("INSERT INTO nowhere VALUES (1)")).await;
    let err = tx.commit().await.unwrap_err();
    assert!(matches!(
        err,
        DbError::TransactionInactive {
            state: "rolled back",
            ..
        }
    ));
}

#[tokio::test]
async fn test_explicit_rollback() {
    let (pool, _file) = setup().await;

    let mut tx = Transaction::begin(&pool).await.unwrap();
    tx.step(&adjust(2, 1000)).await.unwrap();
    let row = tx
        .query_one(&Statement::raw("SELECT balance FROM account WHERE id = 2"))
        .await
        .unwrap();
    assert_eq!(row.get::<i64>("balance").unwrap(), 1050);
    tx.rollback().await.unwrap();

    assert_eq!(balances(&pool).await, vec![(1, 100), (2, 50)]);
}

#[tokio::test]
async fn test_dropped_transaction_rolls_back() {
    let (pool, _file) = setup().await;

    {
        let mut tx = Transaction::begin(&pool).await.unwrap();
        tx.step(&adjust(1, -100)).await.unwrap();
    }

    // Let the scheduled rollback run.
    for _ in 0..50 {
        if pool.status().in_use == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.status().in_use, 0);
    assert_eq!(balances(&pool).await, vec![(1, 100), (2, 50)]);
}

#[tokio::test]
async fn test_run_transaction_commits() {
    let (pool, _file) = setup().await;

    let moved = run_transaction(&pool, &ExactRows(1), |tx| {
        Box::pin(async move {
            tx.step(&adjust(1, -10)).await?;
            tx.step(&adjust(2, 10)).await?;
            Ok(10)
        })
    })
    .await
    .unwrap();

    assert_eq!(moved, 10);
    assert_eq!(balances(&pool).await, vec![(1, 90), (2, 60)]);
}

#[tokio::test]
async fn test_run_transaction_body_error_rolls_back() {
    let (pool, _file) = setup().await;

    let err = run_transaction(&pool, &NoCheck, |tx| {
        Box::pin(async move {
            tx.step(&adjust(1, -10)).await?;
            Err::<(), _>(DbError::invalid_template("caller gave up"))
        })
    })
    .await
    .unwrap_err();

    assert!(matches!(err, DbError::InvalidTemplate { .. }));
    assert_eq!(balances(&pool).await, vec![(1, 100), (2, 50)]);
}

#[tokio::test]
async fn test_run_transaction_panic_rolls_back_and_resumes() {
    let (pool, _file) = setup().await;

    let task_pool = pool.clone();
    let handle = tokio::spawn(async move {
        run_transaction(&task_pool, &NoCheck, |tx| {
            Box::pin(async move {
                tx.step(&adjust(1, -10)).await?;
                if tx.outcomes().len() == 1 {
                    panic!("boom");
                }
                Ok(())
            })
        })
        .await
    });

    let join_err = handle.await.unwrap_err();
    assert!(join_err.is_panic());
    let payload = join_err.into_panic();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));

    assert_eq!(pool.status().in_use, 0);
    assert_eq!(balances(&pool).await, vec![(1, 100), (2, 50)]);
}

#[tokio::test]
async fn test_begin_fails_when_pool_exhausted() {
    let temp_file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}?mode=rwc", temp_file.path().display());
    let pool = Pool::connect(PoolConfig::new(url, 1, 1, Duration::ZERO))
        .await
        .unwrap();

    let _held = pool.acquire().await.unwrap();
    let err = Transaction::begin(&pool).await.unwrap_err();
    assert!(matches!(err, DbError::Begin { .. }));
    assert_eq!(err.category(), ErrorCategory::Transaction);
}

#[tokio::test]
async fn test_failed_commit_discards_connection() {
    let (pool, _file) = setup().await;
    let exec = StatementExecutor::new();
    let mut lease = pool.acquire().await.unwrap();
    exec.execute(
        &mut lease,
        &Statement::raw(
            "CREATE TABLE transfer (id INTEGER PRIMARY KEY, \
             account_id INTEGER NOT NULL REFERENCES account(id) DEFERRABLE INITIALLY DEFERRED)",
        ),
    )
    .await
    .unwrap();
    lease.release();
    let open_before = pool.status().open;

    let mut tx = Transaction::begin(&pool).await.unwrap();
    let id = tx.id().to_string();
    // The foreign key is only checked at COMMIT.
    tx.step(&bind_positional("INSERT INTO transfer (account_id) VALUES (?)", [99]).unwrap())
        .await
        .unwrap();

    let err = tx.commit().await.unwrap_err();
    match &err {
        DbError::Commit { transaction_id, .. } => assert_eq!(transaction_id, &id),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.category(), ErrorCategory::Transaction);
    assert!(!err.is_retryable());
    assert_eq!(pool.status().open, open_before - 1);
    assert_eq!(pool.status().in_use, 0);

    let mut lease = pool.acquire().await.unwrap();
    let row = exec
        .query_one(&mut lease, &Statement::raw("SELECT COUNT(*) AS n FROM transfer"))
        .await
        .unwrap();
    assert_eq!(row.get::<i64>("n").unwrap(), 0);
}
