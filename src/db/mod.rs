//! Database access layer.
//!
//! This module provides:
//! - Connection pool management and borrowed connections
//! - Query execution behind the [`Executor`] trait
//! - Transactions with guaranteed rollback and release
//! - Offset pagination
//! - Row decoding into JSON records

#[macro_use]
pub mod macros;
pub mod executor;
pub mod pagination;
pub(crate) mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use executor::Executor;
pub use pagination::{PageRequest, PaginationMeta, PaginationResult, paginate};
pub use pool::{ConnectionPool, DbConnection, DbPool, PoolStatus, is_pool_fault};
pub use transaction::with_transaction;
