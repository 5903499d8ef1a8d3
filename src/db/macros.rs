//! Backend dispatch macro.
//!
//! Pools and pooled connections are enums with one variant per backend.
//! [`impl_db_dispatch!`] expands the per-backend match so call sites stay
//! linear.

/// Generate match arms over a backend enum from `crate::db::pool`.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool: &self.pool, {
///     Postgres(p) => p.size(),
///     SQLite(p) => p.size(),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($kind:ident : $value:expr, { $($variant:ident($p:pat) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $crate::db::pool::$kind::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
