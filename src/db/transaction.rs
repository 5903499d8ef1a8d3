//! Transaction runner.
//!
//! [`with_transaction`] borrows one connection, wraps a unit of work in
//! BEGIN/COMMIT and rolls back on any failure. The connection goes back to
//! the pool exactly once on every path, including when the returned future
//! is dropped before it completes.
//!
//! Transactions do not nest: issuing BEGIN again on the connection handed to
//! the unit of work is not detected.

use crate::db::pool::{ConnectionPool, DbConnection};
use crate::error::{DbError, DbResult};
use futures_util::future::BoxFuture;
use tracing::{debug, error, warn};

/// Run `work` inside a transaction on a freshly acquired connection.
///
/// Commits when `work` succeeds and returns its value. On any failure
/// (BEGIN, the unit of work, or COMMIT) the transaction is rolled back and
/// the original error is returned; a failing ROLLBACK is logged and never
/// replaces that error. A `PoolExhausted` error from acquiring the
/// connection is returned before any transaction is opened.
///
/// ```ignore
/// let id = with_transaction(&pool, |conn| {
///     Box::pin(async move {
///         conn.query("INSERT INTO users (name) VALUES ($1)", vec!["alice".into()]).await?;
///         let row = conn.query("SELECT last_insert_rowid() AS id", vec![]).await?;
///         Ok(row.scalar().cloned())
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<T, F>(pool: &ConnectionPool, work: F) -> DbResult<T>
where
    F: for<'c> FnOnce(&'c mut DbConnection) -> BoxFuture<'c, DbResult<T>>,
{
    let conn = pool.acquire().await?;
    let mut guard = TransactionGuard::new(conn);

    debug!(transaction_id = %guard.id, "Beginning transaction");

    let outcome = run(&mut guard, work).await;
    match outcome {
        Ok(value) => {
            debug!(transaction_id = %guard.id, "Transaction committed");
            guard.release();
            Ok(value)
        }
        Err(err) => {
            let err = err.normalized();
            warn!(transaction_id = %guard.id, error = %err, "Transaction failed, rolling back");
            guard.rollback(&err).await;
            Err(err)
        }
    }
}

async fn run<T, F>(guard: &mut TransactionGuard, work: F) -> DbResult<T>
where
    F: for<'c> FnOnce(&'c mut DbConnection) -> BoxFuture<'c, DbResult<T>>,
{
    let conn = guard.connection()?;
    conn.execute_control("BEGIN").await?;
    let value = work(&mut *conn).await?;
    conn.execute_control("COMMIT").await?;
    Ok(value)
}

/// Owns the transaction's connection until it is released.
///
/// Dropping an armed guard (the caller's future was cancelled mid-way)
/// issues a best-effort ROLLBACK on a background task before the connection
/// returns to the pool.
struct TransactionGuard {
    id: String,
    conn: Option<DbConnection>,
}

impl TransactionGuard {
    fn new(conn: DbConnection) -> Self {
        Self {
            id: generate_transaction_id(),
            conn: Some(conn),
        }
    }

    fn connection(&mut self) -> DbResult<&mut DbConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::pool_fault("transaction connection already released"))
    }

    /// Return the connection to the pool and disarm the guard.
    fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            conn.release();
        }
    }

    /// Roll back, log a failing rollback, then release.
    ///
    /// The connection stays in the guard while ROLLBACK runs, so a cancelled
    /// rollback is retried by `Drop`.
    async fn rollback(mut self, cause: &DbError) {
        if let Ok(conn) = self.connection() {
            match conn.execute_control("ROLLBACK").await {
                Ok(()) => debug!(transaction_id = %self.id, "Transaction rolled back"),
                Err(rollback_err) => error!(
                    transaction_id = %self.id,
                    error = %rollback_err,
                    cause = %cause,
                    "Rollback failed"
                ),
            }
        }
        self.release();
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let id = std::mem::take(&mut self.id);

        // Without a runtime the connection is simply dropped; the pool
        // discards connections it cannot return cleanly.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(transaction_id = %id, "Transaction abandoned outside a runtime");
            return;
        };

        handle.spawn(async move {
            if let Err(err) = conn.execute_control("ROLLBACK").await {
                error!(transaction_id = %id, error = %err, "Rollback after cancellation failed");
            }
            conn.release();
            warn!(
                transaction_id = %id,
                "Transaction rolled back via Drop - the caller stopped awaiting it"
            );
        });
    }
}

/// Generate a transaction ID for log correlation.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
