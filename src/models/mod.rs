//! Data models shared by the pool, the transaction runner and the paginator.

pub mod connection;
pub mod query;

pub use connection::{DatabaseType, mask_connection_string};
pub use query::{QueryParam, QueryRequest, QueryResult, Record};
