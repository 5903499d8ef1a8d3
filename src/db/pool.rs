//! Connection pool management.
//!
//! This module wraps database-specific sqlx pools (PgPool, SqlitePool) to
//! keep full type support, and hands out [`DbConnection`]s for work that must
//! stay on one connection.

use crate::config::PoolConfig;
use crate::db::executor::{self, Executor};
use crate::error::{DbError, DbResult};
use crate::logging::{QueryLogger, duration_millis};
use crate::models::{DatabaseType, QueryParam, QueryRequest, QueryResult, mask_connection_string};
use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgPool, Postgres, Sqlite, SqlitePool};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// Pool occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Open connections, idle or in use
    pub size: u32,
    pub idle: usize,
    pub max_connections: u32,
}

/// State shared by a pool and every connection borrowed from it.
#[derive(Debug)]
pub(crate) struct PoolShared {
    config: PoolConfig,
    logger: Arc<QueryLogger>,
}

impl PoolShared {
    pub(crate) fn logger(&self) -> &QueryLogger {
        &self.logger
    }

    pub(crate) fn driver_error(&self, err: sqlx::Error) -> DbError {
        classify_driver_error(err, self.config.connect_timeout())
    }
}

/// Whether a driver error means the pool itself is broken, as opposed to a
/// single query or connection failing.
pub fn is_pool_fault(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::WorkerCrashed)
}

/// Map a driver error to the caller-facing error.
///
/// Pool faults do not return: they are logged and the process exits.
pub(crate) fn classify_driver_error(err: sqlx::Error, acquire_timeout: Duration) -> DbError {
    if is_pool_fault(&err) {
        exit_on_pool_fault(&err);
    }
    match err {
        sqlx::Error::PoolTimedOut => DbError::pool_exhausted(duration_millis(acquire_timeout)),
        other => DbError::from(other).normalized(),
    }
}

fn exit_on_pool_fault(err: &sqlx::Error) -> ! {
    let fault = DbError::pool_fault(err.to_string());
    error!(error = %fault, "Unexpected error on idle client");
    std::process::exit(1)
}

/// Bounded set of database connections.
///
/// Cheap to clone; clones share the same underlying pool.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    pool: DbPool,
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Create the pool and establish its first connection.
    pub async fn connect(config: PoolConfig, logger: Arc<QueryLogger>) -> DbResult<Self> {
        config.validate()?;

        info!(
            db_type = %config.db_type(),
            url = %mask_connection_string(config.connection_string()),
            max_connections = config.max_connections(),
            "Creating connection pool"
        );

        let pool = create_pool(&config).await?;

        info!(db_type = %pool.db_type(), "Connection pool ready");

        Ok(Self {
            pool,
            shared: Arc::new(PoolShared { config, logger }),
        })
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// The query logger; flip it on or off at runtime with `set_enabled`.
    pub fn logger(&self) -> &Arc<QueryLogger> {
        &self.shared.logger
    }

    /// Underlying sqlx pool, for work outside this crate's operations.
    pub fn inner(&self) -> &DbPool {
        &self.pool
    }

    /// Run one statement on any free connection.
    pub async fn execute(&self, request: &QueryRequest) -> DbResult<QueryResult> {
        let fetch = impl_db_dispatch!(DbPool: &self.pool, {
            Postgres(p) => executor::postgres::fetch(p, &request.sql, &request.params),
            SQLite(p) => executor::sqlite::fetch(p, &request.sql, &request.params),
        });
        executor::run_logged(&self.shared, request, fetch).await
    }

    /// Convenience form of [`execute`](Self::execute).
    pub async fn query(
        &self,
        sql: impl Into<String>,
        params: Vec<QueryParam>,
    ) -> DbResult<QueryResult> {
        self.execute(&QueryRequest::with_params(sql, params)).await
    }

    /// Borrow a connection, waiting at most the connect timeout.
    pub async fn acquire(&self) -> DbResult<DbConnection> {
        let inner = impl_db_dispatch!(DbPool: &self.pool, {
            Postgres(p) => p.acquire().await.map(PooledConnection::Postgres),
            SQLite(p) => p.acquire().await.map(PooledConnection::SQLite),
        })
        .map_err(|e| {
            error!(error = %e, "Failed to acquire connection");
            self.shared.driver_error(e)
        })?;

        debug!("Connection acquired");
        Ok(DbConnection {
            inner,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Return a connection to the pool.
    pub fn release(&self, conn: DbConnection) {
        conn.release();
    }

    pub fn status(&self) -> PoolStatus {
        let (size, idle) = impl_db_dispatch!(DbPool: &self.pool, {
            Postgres(p) => (p.size(), p.num_idle()),
            SQLite(p) => (p.size(), p.num_idle()),
        });
        PoolStatus {
            size,
            idle,
            max_connections: self.shared.config.max_connections(),
        }
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(DbPool: &self.pool, {
            Postgres(p) => p.is_closed(),
            SQLite(p) => p.is_closed(),
        })
    }

    /// Close every connection; waits for borrowed connections to come back.
    pub async fn close(&self) {
        impl_db_dispatch!(DbPool: &self.pool, {
            Postgres(p) => p.close().await,
            SQLite(p) => p.close().await,
        });
        info!("Connection pool closed");
    }
}

impl ConnectionPool {
    /// Run two requests on separate pooled connections at the same time.
    async fn execute_concurrently(
        &self,
        first: &QueryRequest,
        second: &QueryRequest,
    ) -> DbResult<(QueryResult, QueryResult)> {
        tokio::try_join!(self.execute(first), self.execute(second))
    }
}

impl Executor for ConnectionPool {
    fn db_type(&self) -> DatabaseType {
        ConnectionPool::db_type(self)
    }

    fn execute(
        &mut self,
        request: &QueryRequest,
    ) -> impl Future<Output = DbResult<QueryResult>> + Send {
        ConnectionPool::execute(self, request)
    }

    fn execute_pair(
        &mut self,
        first: &QueryRequest,
        second: &QueryRequest,
    ) -> impl Future<Output = DbResult<(QueryResult, QueryResult)>> + Send {
        self.execute_concurrently(first, second)
    }
}

// Lets callers paginate through a shared pool
impl Executor for &ConnectionPool {
    fn db_type(&self) -> DatabaseType {
        ConnectionPool::db_type(self)
    }

    fn execute(
        &mut self,
        request: &QueryRequest,
    ) -> impl Future<Output = DbResult<QueryResult>> + Send {
        ConnectionPool::execute(self, request)
    }

    fn execute_pair(
        &mut self,
        first: &QueryRequest,
        second: &QueryRequest,
    ) -> impl Future<Output = DbResult<(QueryResult, QueryResult)>> + Send {
        self.execute_concurrently(first, second)
    }
}

/// Create the backend pool for the given configuration.
async fn create_pool(config: &PoolConfig) -> DbResult<DbPool> {
    let acquire_timeout = config.connect_timeout();
    let idle_timeout = Some(config.idle_timeout());
    let connect_error = |e: sqlx::Error| {
        error!(error = %e, "Failed to connect");
        classify_driver_error(e, acquire_timeout)
    };

    match config.db_type() {
        DatabaseType::PostgreSQL => {
            let options = PgConnectOptions::from_str(config.connection_string()).map_err(|e| {
                DbError::configuration(format!("Invalid PostgreSQL connection string: {}", e))
            })?;

            let pool = PgPoolOptions::new()
                .min_connections(config.min_connections())
                .max_connections(config.max_connections())
                .acquire_timeout(acquire_timeout)
                .idle_timeout(idle_timeout)
                .test_before_acquire(config.test_before_acquire())
                .connect_with(options)
                .await
                .map_err(connect_error)?;
            Ok(DbPool::Postgres(pool))
        }
        DatabaseType::SQLite => {
            let options = SqliteConnectOptions::from_str(config.connection_string()).map_err(|e| {
                DbError::configuration(format!("Invalid SQLite connection string: {}", e))
            })?;

            let pool = SqlitePoolOptions::new()
                .min_connections(config.min_connections())
                .max_connections(config.max_connections())
                .acquire_timeout(acquire_timeout)
                .idle_timeout(idle_timeout)
                .test_before_acquire(config.test_before_acquire())
                .connect_with(options)
                .await
                .map_err(connect_error)?;
            Ok(DbPool::SQLite(pool))
        }
    }
}

// =============================================================================
// Borrowed connections
// =============================================================================

enum PooledConnection {
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

/// A connection borrowed from a [`ConnectionPool`].
///
/// Owned exclusively until released. Releasing consumes the handle; dropping
/// it also returns the connection to the pool.
pub struct DbConnection {
    inner: PooledConnection,
    shared: Arc<PoolShared>,
}

impl DbConnection {
    pub fn db_type(&self) -> DatabaseType {
        match self.inner {
            PooledConnection::Postgres(_) => DatabaseType::PostgreSQL,
            PooledConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Run one statement on this connection.
    pub async fn execute(&mut self, request: &QueryRequest) -> DbResult<QueryResult> {
        let fetch = impl_db_dispatch!(PooledConnection: &mut self.inner, {
            Postgres(c) => executor::postgres::fetch(&mut **c, &request.sql, &request.params),
            SQLite(c) => executor::sqlite::fetch(&mut **c, &request.sql, &request.params),
        });
        executor::run_logged(&self.shared, request, fetch).await
    }

    /// Convenience form of [`execute`](Self::execute).
    pub async fn query(
        &mut self,
        sql: impl Into<String>,
        params: Vec<QueryParam>,
    ) -> DbResult<QueryResult> {
        self.execute(&QueryRequest::with_params(sql, params)).await
    }

    /// Run a parameterless control statement (BEGIN, COMMIT, ROLLBACK).
    ///
    /// Not reported to the query logger.
    pub(crate) async fn execute_control(&mut self, sql: &str) -> DbResult<()> {
        let fetch = impl_db_dispatch!(PooledConnection: &mut self.inner, {
            Postgres(c) => executor::postgres::fetch(&mut **c, sql, &[]),
            SQLite(c) => executor::sqlite::fetch(&mut **c, sql, &[]),
        });
        fetch
            .await
            .map(|_| ())
            .map_err(|e| self.shared.driver_error(e))
    }

    /// Return the connection to the pool.
    pub fn release(self) {
        debug!(db_type = %self.db_type(), "Connection released");
    }
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("db_type", &self.db_type())
            .finish_non_exhaustive()
    }
}

impl Executor for DbConnection {
    fn db_type(&self) -> DatabaseType {
        DbConnection::db_type(self)
    }

    fn execute(
        &mut self,
        request: &QueryRequest,
    ) -> impl Future<Output = DbResult<QueryResult>> + Send {
        DbConnection::execute(self, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UNKNOWN_CODE;

    #[test]
    fn test_pool_fault_classification() {
        assert!(is_pool_fault(&sqlx::Error::WorkerCrashed));
        assert!(!is_pool_fault(&sqlx::Error::PoolTimedOut));
        assert!(!is_pool_fault(&sqlx::Error::PoolClosed));
        assert!(!is_pool_fault(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn test_pool_timeout_maps_to_pool_exhausted() {
        let err = classify_driver_error(sqlx::Error::PoolTimedOut, Duration::from_millis(2000));
        assert!(matches!(err, DbError::PoolExhausted { timeout_ms: 2000 }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_other_driver_errors_are_normalized() {
        let err = classify_driver_error(sqlx::Error::RowNotFound, Duration::from_secs(2));
        match err {
            DbError::Normalized(normalized) => {
                assert_eq!(normalized.code(), UNKNOWN_CODE);
                assert!(normalized.message().starts_with("Database error occurred"));
            }
            other => panic!("expected normalized error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let config = PoolConfig::new("sqlite::memory:")
            .unwrap()
            .with_max_connections(0);
        let result = ConnectionPool::connect(config, Arc::new(QueryLogger::default())).await;
        assert!(matches!(result, Err(DbError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_in_memory_pool_status() {
        let config = PoolConfig::new("sqlite::memory:")
            .unwrap()
            .with_max_connections(1);
        let pool = ConnectionPool::connect(config, Arc::new(QueryLogger::default()))
            .await
            .unwrap();

        let status = pool.status();
        assert_eq!(status.max_connections, 1);
        assert!(status.size <= 1);
        assert_eq!(pool.db_type(), DatabaseType::SQLite);

        pool.close().await;
        assert!(pool.is_closed());
    }
}
