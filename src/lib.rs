//! Connection pooling, transactions, pagination and error normalization on
//! top of sqlx, for PostgreSQL and SQLite.
//!
//! - [`ConnectionPool`] owns the connections and runs single statements.
//! - [`with_transaction`] wraps a unit of work in BEGIN/COMMIT/ROLLBACK.
//! - [`paginate`] returns one page of a query plus its metadata.
//! - [`normalize`] turns backend failures into a [`NormalizedError`].
//! - [`QueryLogger`] optionally records executed queries.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;

pub use config::{Config, PoolConfig, QueryLogConfig};
pub use db::{
    ConnectionPool, DbConnection, Executor, PageRequest, PaginationResult, PoolStatus, paginate,
    with_transaction,
};
pub use error::{DbError, DbResult, NormalizedError, normalize};
pub use logging::{QueryLogEntry, QueryLogger, QueryRecorder};
pub use models::{QueryParam, QueryRequest, QueryResult};
