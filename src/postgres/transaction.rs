use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_postgres::Client;
use tracing::{debug, warn};

use super::Postgres;
use crate::context::Context;
use crate::error::PgCompatError;
use crate::pool::{Backend, Conn};

/// Isolation level requested for [`Postgres::transact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Whatever the server's `default_transaction_isolation` is.
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IsolationLevel::Default => "default",
            IsolationLevel::ReadUncommitted => "read-uncommitted",
            IsolationLevel::ReadCommitted => "read-committed",
            IsolationLevel::RepeatableRead => "repeatable-read",
            IsolationLevel::Serializable => "serializable",
        })
    }
}

impl IsolationLevel {
    /// Level understood by the pool backend's driver. `None` keeps the server default.
    ///
    /// # Errors
    /// Returns `UnsupportedIsolationLevel` for `ReadUncommitted`.
    pub fn to_pool_level(self) -> Result<Option<tokio_postgres::IsolationLevel>, PgCompatError> {
        match self {
            IsolationLevel::Default => Ok(None),
            IsolationLevel::ReadCommitted => Ok(Some(tokio_postgres::IsolationLevel::ReadCommitted)),
            IsolationLevel::RepeatableRead => {
                Ok(Some(tokio_postgres::IsolationLevel::RepeatableRead))
            }
            IsolationLevel::Serializable => Ok(Some(tokio_postgres::IsolationLevel::Serializable)),
            IsolationLevel::ReadUncommitted => {
                Err(PgCompatError::UnsupportedIsolationLevel(self.to_string()))
            }
        }
    }

    /// `BEGIN` statement for the standard backend.
    ///
    /// # Errors
    /// Returns `UnsupportedIsolationLevel` for `ReadUncommitted`.
    pub fn standard_begin_sql(self) -> Result<&'static str, PgCompatError> {
        match self {
            IsolationLevel::Default => Ok("BEGIN"),
            IsolationLevel::ReadCommitted => Ok("BEGIN ISOLATION LEVEL READ COMMITTED"),
            IsolationLevel::RepeatableRead => Ok("BEGIN ISOLATION LEVEL REPEATABLE READ"),
            IsolationLevel::Serializable => Ok("BEGIN ISOLATION LEVEL SERIALIZABLE"),
            IsolationLevel::ReadUncommitted => {
                Err(PgCompatError::UnsupportedIsolationLevel(self.to_string()))
            }
        }
    }
}

/// `BEGIN` statement for the pool backend.
///
/// # Errors
/// Returns `UnsupportedIsolationLevel` for levels this crate does not open.
pub fn pool_begin_sql(
    level: Option<tokio_postgres::IsolationLevel>,
) -> Result<&'static str, PgCompatError> {
    match level {
        None => Ok("BEGIN"),
        Some(tokio_postgres::IsolationLevel::ReadCommitted) => {
            Ok("BEGIN ISOLATION LEVEL READ COMMITTED")
        }
        Some(tokio_postgres::IsolationLevel::RepeatableRead) => {
            Ok("BEGIN ISOLATION LEVEL REPEATABLE READ")
        }
        Some(tokio_postgres::IsolationLevel::Serializable) => {
            Ok("BEGIN ISOLATION LEVEL SERIALIZABLE")
        }
        Some(other) => Err(PgCompatError::UnsupportedIsolationLevel(format!(
            "{other:?}"
        ))),
    }
}

fn begin_sql(backend: &Backend, level: IsolationLevel) -> Result<&'static str, PgCompatError> {
    match backend {
        Backend::Pool(_) => pool_begin_sql(level.to_pool_level()?),
        Backend::Standard { .. } => level.standard_begin_sql(),
    }
}

#[async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(&self) -> Result<(), PgCompatError>;
    async fn rollback(&self) -> Result<(), PgCompatError>;
}

/// An open transaction pinned to one checked-out connection.
///
/// Statements issued through a transaction-scoped [`Postgres`] run here until
/// `commit` or `rollback`; after that they fail with `TransactionFinished`.
pub struct TransactCompat {
    conn: Option<Conn>,
    finished: AtomicBool,
}

impl fmt::Debug for TransactCompat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactCompat")
            .field("conn", &self.conn)
            .field("finished", &self.finished.load(Ordering::Acquire))
            .finish()
    }
}

impl TransactCompat {
    /// Open a transaction on `conn`.
    ///
    /// The connection is owned by the transaction before `BEGIN` is sent, so
    /// dropping this future midway rolls back instead of returning the
    /// connection to the pool inside an open transaction.
    ///
    /// # Errors
    /// Returns the driver error if `BEGIN` fails.
    pub(crate) async fn begin(conn: Conn, begin_sql: &str) -> Result<Self, PgCompatError> {
        let tx = Self {
            conn: Some(conn),
            finished: AtomicBool::new(false),
        };
        if let Err(err) = tx.raw_client()?.batch_execute(begin_sql).await {
            tx.finished.store(true, Ordering::Release);
            return Err(err.into());
        }
        Ok(tx)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Client for statements inside the transaction.
    ///
    /// # Errors
    /// Returns `TransactionFinished` after commit or rollback.
    pub fn client(&self) -> Result<&Client, PgCompatError> {
        if self.is_finished() {
            return Err(PgCompatError::TransactionFinished);
        }
        self.raw_client()
    }

    fn raw_client(&self) -> Result<&Client, PgCompatError> {
        match &self.conn {
            Some(conn) => conn.client(),
            None => Err(PgCompatError::TransactionFinished),
        }
    }

    fn mark_finished(&self) -> Result<(), PgCompatError> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(PgCompatError::TransactionFinished);
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for TransactCompat {
    async fn commit(&self) -> Result<(), PgCompatError> {
        self.mark_finished()?;
        let client = self.raw_client()?;
        if let Err(err) = client.batch_execute("COMMIT").await {
            if let Err(rollback_err) = client.batch_execute("ROLLBACK").await {
                warn!(error = %rollback_err, "rollback after failed commit");
            }
            return Err(err.into());
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), PgCompatError> {
        self.mark_finished()?;
        self.raw_client()?.batch_execute("ROLLBACK").await?;
        Ok(())
    }
}

impl Drop for TransactCompat {
    fn drop(&mut self) {
        if self.is_finished() {
            return;
        }
        let Some(conn) = self.conn.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("transaction dropped without commit or rollback; rolling back");
                handle.spawn(async move {
                    if let Ok(client) = conn.client() {
                        if let Err(e) = client.batch_execute("ROLLBACK").await {
                            warn!(error = %e, "rollback of dropped transaction failed");
                        }
                    }
                });
            }
            Err(_) => {
                warn!("transaction dropped outside a runtime; connection returned without rollback");
            }
        }
    }
}

/// Commit on success, roll back on failure.
///
/// A failed unit of work always comes back wrapped in `RollbackFailed`, joined
/// with the rollback error when there is one. A failed commit comes back as
/// `CommitFailed`.
pub(crate) async fn finish<X, T>(tx: &X, outcome: Result<T, PgCompatError>) -> Result<T, PgCompatError>
where
    X: Transaction + ?Sized,
{
    match outcome {
        Ok(value) => match tx.commit().await {
            Ok(()) => Ok(value),
            Err(err) => Err(PgCompatError::CommitFailed(Box::new(err))),
        },
        Err(work_err) => {
            let err = match tx.rollback().await {
                Ok(()) => work_err,
                Err(rollback_err) => PgCompatError::join(vec![work_err, rollback_err]),
            };
            Err(PgCompatError::RollbackFailed(Box::new(err)))
        }
    }
}

impl Postgres {
    /// Run `work` inside one transaction.
    ///
    /// `work` receives a transaction-scoped client; every statement it issues
    /// runs on the transaction's connection. The transaction commits when
    /// `work` returns `Ok` and rolls back otherwise.
    ///
    /// ```rust,no_run
    /// use pg_compat_middleware::prelude::*;
    ///
    /// # async fn demo(db: Postgres) -> Result<(), PgCompatError> {
    /// let ctx = Context::background();
    /// let inserted = db
    ///     .transact(&ctx, IsolationLevel::Serializable, |tx| async move {
    ///         let ctx = Context::background();
    ///         let res = tx
    ///             .exec(&ctx, "INSERT INTO users (name) VALUES ($1)", &[RowValues::Text("alice".into())])
    ///             .await?;
    ///         Ok(res.rows_affected)
    ///     })
    ///     .await?;
    /// assert_eq!(inserted, 1);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns `AlreadyInTransaction` on a transaction-scoped client,
    /// `UnsupportedIsolationLevel` for `ReadUncommitted`, the `BEGIN` error,
    /// or the outcome of [`finish`].
    pub async fn transact<F, Fut, T>(
        &self,
        ctx: &Context,
        level: IsolationLevel,
        work: F,
    ) -> Result<T, PgCompatError>
    where
        F: FnOnce(Postgres) -> Fut,
        Fut: Future<Output = Result<T, PgCompatError>>,
    {
        if self.in_transaction() {
            return Err(PgCompatError::AlreadyInTransaction);
        }
        let sql = begin_sql(&self.inner.backend, level)?;

        let tx = ctx
            .run(async {
                let conn = self.inner.backend.checkout().await?;
                TransactCompat::begin(conn, sql).await
            })
            .await?;
        let tx = Arc::new(tx);
        debug!(isolation = %level, "transaction started");

        let scoped = self.with_transaction(Arc::clone(&tx)).await;
        let outcome = work(scoped).await;
        finish(tx.as_ref(), outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTx {
        calls: Mutex<Vec<&'static str>>,
        fail_commit: bool,
        fail_rollback: bool,
    }

    impl FakeTx {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transaction for FakeTx {
        async fn commit(&self) -> Result<(), PgCompatError> {
            self.calls.lock().unwrap().push("commit");
            if self.fail_commit {
                return Err(PgCompatError::Other("commit refused".into()));
            }
            Ok(())
        }

        async fn rollback(&self) -> Result<(), PgCompatError> {
            self.calls.lock().unwrap().push("rollback");
            if self.fail_rollback {
                return Err(PgCompatError::Other("rollback refused".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn successful_work_commits() {
        let tx = FakeTx::default();
        let out = finish(&tx, Ok(42)).await.unwrap();
        assert_eq!(out, 42);
        assert_eq!(tx.calls(), vec!["commit"]);
    }

    #[tokio::test]
    async fn failed_work_rolls_back_and_is_wrapped() {
        let tx = FakeTx::default();
        let err = finish::<_, ()>(&tx, Err(PgCompatError::NoRows))
            .await
            .unwrap_err();
        assert_eq!(tx.calls(), vec!["rollback"]);
        assert_eq!(err.to_string(), "failed to rollback: no rows in result set");
        match err {
            PgCompatError::RollbackFailed(inner) => assert!(matches!(*inner, PgCompatError::NoRows)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_rollback_is_joined_with_work_error() {
        let tx = FakeTx {
            fail_rollback: true,
            ..FakeTx::default()
        };
        let err = finish::<_, ()>(&tx, Err(PgCompatError::NoRows))
            .await
            .unwrap_err();
        let PgCompatError::RollbackFailed(inner) = err else {
            panic!("expected RollbackFailed");
        };
        let causes = inner.causes();
        assert_eq!(causes.len(), 2);
        assert!(matches!(causes[0], PgCompatError::NoRows));
        assert_eq!(causes[1].to_string(), "Other database error: rollback refused");
    }

    #[tokio::test]
    async fn failed_commit_is_wrapped() {
        let tx = FakeTx {
            fail_commit: true,
            ..FakeTx::default()
        };
        let err = finish(&tx, Ok(())).await.unwrap_err();
        assert_eq!(tx.calls(), vec!["commit"]);
        assert_eq!(
            err.to_string(),
            "failed to commit: Other database error: commit refused"
        );
    }

    #[test]
    fn isolation_levels_map_onto_both_backends() {
        let cases = [
            (IsolationLevel::Default, "BEGIN"),
            (
                IsolationLevel::ReadCommitted,
                "BEGIN ISOLATION LEVEL READ COMMITTED",
            ),
            (
                IsolationLevel::RepeatableRead,
                "BEGIN ISOLATION LEVEL REPEATABLE READ",
            ),
            (
                IsolationLevel::Serializable,
                "BEGIN ISOLATION LEVEL SERIALIZABLE",
            ),
        ];
        for (level, sql) in cases {
            assert_eq!(level.standard_begin_sql().unwrap(), sql);
            assert_eq!(pool_begin_sql(level.to_pool_level().unwrap()).unwrap(), sql);
        }
    }

    #[test]
    fn read_uncommitted_is_rejected_everywhere() {
        let level = IsolationLevel::ReadUncommitted;
        assert!(matches!(
            level.to_pool_level(),
            Err(PgCompatError::UnsupportedIsolationLevel(_))
        ));
        assert!(matches!(
            level.standard_begin_sql(),
            Err(PgCompatError::UnsupportedIsolationLevel(_))
        ));
        assert!(matches!(
            pool_begin_sql(Some(tokio_postgres::IsolationLevel::ReadUncommitted)),
            Err(PgCompatError::UnsupportedIsolationLevel(_))
        ));
    }
}
