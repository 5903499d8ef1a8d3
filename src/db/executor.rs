//! Query execution.
//!
//! [`Executor`] is the seam the paginator and transaction runner are written
//! against. It is implemented by [`ConnectionPool`](crate::db::ConnectionPool),
//! which runs each query on any free connection, and by
//! [`DbConnection`](crate::db::DbConnection), which runs everything on the one
//! connection it holds.
//!
//! # Architecture
//!
//! Backend-specific fetching lives in the `postgres` and `sqlite` submodules.
//! Both drain sqlx's `fetch_many` stream so a single call yields the rows and
//! the affected-row count, whatever kind of statement was run.

use crate::db::pool::PoolShared;
use crate::db::types::ToRecord;
use crate::error::DbResult;
use crate::logging::duration_millis;
use crate::models::{DatabaseType, QueryParam, QueryRequest, QueryResult, Record};
use futures_util::TryStreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use sqlx::Either;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, error};

/// Runs queries against one backend.
pub trait Executor: Send {
    /// Backend the queries run against.
    fn db_type(&self) -> DatabaseType;

    /// Run one statement and collect its rows.
    fn execute(
        &mut self,
        request: &QueryRequest,
    ) -> impl Future<Output = DbResult<QueryResult>> + Send;

    /// Run two independent statements.
    ///
    /// One after the other by default; executors that own more than one
    /// connection may run them concurrently.
    fn execute_pair(
        &mut self,
        first: &QueryRequest,
        second: &QueryRequest,
    ) -> impl Future<Output = DbResult<(QueryResult, QueryResult)>> + Send {
        async move {
            let first = self.execute(first).await?;
            let second = self.execute(second).await?;
            Ok((first, second))
        }
    }
}

impl<E: Executor> Executor for &mut E {
    fn db_type(&self) -> DatabaseType {
        Executor::db_type(&**self)
    }

    fn execute(
        &mut self,
        request: &QueryRequest,
    ) -> impl Future<Output = DbResult<QueryResult>> + Send {
        Executor::execute(&mut **self, request)
    }

    fn execute_pair(
        &mut self,
        first: &QueryRequest,
        second: &QueryRequest,
    ) -> impl Future<Output = DbResult<(QueryResult, QueryResult)>> + Send {
        Executor::execute_pair(&mut **self, first, second)
    }
}

/// Rows and affected-row count of one statement.
#[derive(Debug, Default)]
pub(crate) struct Fetched {
    pub rows: Vec<Record>,
    pub rows_affected: u64,
}

/// Run a fetch, time it, report it to the query logger and classify failures.
pub(crate) async fn run_logged(
    shared: &PoolShared,
    request: &QueryRequest,
    fetch: BoxFuture<'_, Result<Fetched, sqlx::Error>>,
) -> DbResult<QueryResult> {
    debug!(
        sql = %request.sql,
        params = request.params.len(),
        "Executing query"
    );

    let start = Instant::now();
    let outcome = fetch.await;
    let duration = start.elapsed();

    match outcome {
        Ok(fetched) => {
            shared
                .logger()
                .log_query(&request.sql, &request.params, duration);
            Ok(QueryResult::new(
                fetched.rows,
                fetched.rows_affected,
                duration_millis(duration),
            ))
        }
        Err(err) => {
            error!(
                sql = %request.sql,
                params = %params_for_log(&request.params),
                duration_ms = duration_millis(duration),
                error = %err,
                "Query error"
            );
            Err(shared.driver_error(err))
        }
    }
}

pub(crate) fn params_for_log(params: &[QueryParam]) -> String {
    serde_json::to_string(params).unwrap_or_default()
}

async fn drain<Q, R: ToRecord>(
    mut stream: BoxStream<'_, Result<Either<Q, R>, sqlx::Error>>,
    rows_affected: fn(&Q) -> u64,
) -> Result<Fetched, sqlx::Error> {
    let mut fetched = Fetched::default();
    while let Some(step) = stream.try_next().await? {
        match step {
            Either::Left(done) => fetched.rows_affected += rows_affected(&done),
            Either::Right(row) => fetched.rows.push(row.to_record()),
        }
    }
    Ok(fetched)
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

pub(crate) mod postgres {
    use super::*;
    use crate::db::params::postgres_query;
    use sqlx::Postgres;
    use sqlx::postgres::PgQueryResult;

    pub fn fetch<'e, 'c: 'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> BoxFuture<'e, Result<Fetched, sqlx::Error>>
    where
        E: 'e + sqlx::Executor<'c, Database = Postgres>,
    {
        // Without parameters the statement goes over the simple protocol,
        // which also accepts BEGIN/COMMIT and multi-statement scripts.
        let stream = if params.is_empty() {
            executor.fetch_many(sql)
        } else {
            executor.fetch_many(postgres_query(sql, params))
        };
        Box::pin(drain(stream, PgQueryResult::rows_affected))
    }
}

pub(crate) mod sqlite {
    use super::*;
    use crate::db::params::sqlite_query;
    use sqlx::Sqlite;
    use sqlx::sqlite::SqliteQueryResult;

    pub fn fetch<'e, 'c: 'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> BoxFuture<'e, Result<Fetched, sqlx::Error>>
    where
        E: 'e + sqlx::Executor<'c, Database = Sqlite>,
    {
        let stream = if params.is_empty() {
            executor.fetch_many(sql)
        } else {
            executor.fetch_many(sqlite_query(sql, params))
        };
        Box::pin(drain(stream, SqliteQueryResult::rows_affected))
    }
}
