//! Error types for the toolkit.
//!
//! Driver failures are tagged as [`BackendError`] where the `sqlx::Error` is
//! first caught, and turned into a [`NormalizedError`] (stable code, readable
//! message, detail) before they leave a public operation. [`normalize`] is the
//! single place that mapping happens.

use std::sync::Arc;
use thiserror::Error;

/// Code reported when the backend supplies none.
pub const UNKNOWN_CODE: &str = "UNKNOWN";

/// Message prefix for codes missing from [`ERROR_CODES`].
pub const GENERIC_MESSAGE: &str = "Database error occurred";

/// PostgreSQL SQLSTATE codes with a human-readable description.
pub const ERROR_CODES: &[(&str, &str)] = &[
    ("23505", "Unique constraint violation"),
    ("23503", "Foreign key constraint violation"),
    ("23502", "Not null constraint violation"),
    ("23514", "Check constraint violation"),
    ("42P01", "Undefined table"),
    ("42703", "Undefined column"),
    ("42883", "Undefined function"),
    ("42P07", "Duplicate table"),
    ("42701", "Duplicate column"),
    ("22P02", "Invalid text representation"),
    ("22003", "Numeric value out of range"),
    ("08006", "Connection failure"),
    ("08003", "Connection does not exist"),
    ("08000", "Connection exception"),
    ("53300", "Too many connections"),
];

/// Look up the description for a backend code.
pub fn describe_code(code: &str) -> Option<&'static str> {
    ERROR_CODES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, description)| *description)
}

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Connection pool exhausted: no connection available within {timeout_ms}ms")]
    PoolExhausted { timeout_ms: u64 },

    /// Raw driver failure, not yet normalized.
    #[error(transparent)]
    Backend(BackendError),

    #[error(transparent)]
    Normalized(NormalizedError),

    /// Unrecoverable fault of the pool itself (not of a single query).
    #[error("Connection pool fault: {message}")]
    PoolFault { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl DbError {
    /// Create a pool exhausted error.
    pub fn pool_exhausted(timeout_ms: u64) -> Self {
        Self::PoolExhausted { timeout_ms }
    }

    /// Create a pool fault error.
    pub fn pool_fault(message: impl Into<String>) -> Self {
        Self::PoolFault {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Replace a raw backend failure with its normalized form.
    ///
    /// Every other variant is returned as is, so this can be applied more
    /// than once on the way out of nested operations.
    pub fn normalized(self) -> Self {
        match self {
            Self::Backend(err) => Self::Normalized(normalize_backend(err)),
            other => other,
        }
    }

    /// Backend code carried by this error, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Backend(err) => err.code.as_deref(),
            Self::Normalized(err) => Some(err.code()),
            _ => None,
        }
    }

    /// Check if the caller may retry the operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }
}

/// Convert sqlx errors into a tagged backend failure.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(BackendError::from(err))
    }
}

impl From<BackendError> for DbError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}

impl From<NormalizedError> for DbError {
    fn from(err: NormalizedError) -> Self {
        Self::Normalized(err)
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Backend errors
// =============================================================================

/// A failure reported by the data store, before normalization.
#[derive(Debug, Clone)]
pub struct BackendError {
    /// Vendor code, e.g. "23505" for a unique violation
    pub code: Option<String>,
    /// Server-provided detail (PostgreSQL only)
    pub detail: Option<String>,
    pub message: String,
    source: Option<Arc<sqlx::Error>>,
}

impl BackendError {
    /// Create a backend error without an underlying driver error.
    pub fn new(code: Option<String>, detail: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            detail,
            message: message.into(),
            source: None,
        }
    }

    /// The driver error this was built from, if any.
    pub fn driver_error(&self) -> Option<&sqlx::Error> {
        self.source.as_deref()
    }
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        let (code, detail, message) = match &err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                let detail = db_err
                    .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                    .and_then(|pg| pg.detail())
                    .map(String::from);
                (code, detail, db_err.message().to_string())
            }
            other => (None, None, other.to_string()),
        };

        Self {
            code,
            detail,
            message,
            source: Some(Arc::new(err)),
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// =============================================================================
// Normalized errors
// =============================================================================

/// Caller-facing database error with a stable code.
#[derive(Debug, Clone)]
pub struct NormalizedError {
    message: String,
    code: String,
    detail: String,
    original: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl NormalizedError {
    pub fn new(
        message: impl Into<String>,
        code: impl Into<String>,
        detail: impl Into<String>,
        original: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            detail: detail.into(),
            original,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Backend code, or [`UNKNOWN_CODE`].
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Backend detail; empty when the backend gave none.
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// The error this was normalized from.
    pub fn original(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.original.as_deref()
    }

    /// Whether the code has an entry in [`ERROR_CODES`].
    pub fn is_known_code(&self) -> bool {
        describe_code(&self.code).is_some()
    }
}

impl PartialEq for NormalizedError {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message && self.code == other.code && self.detail == other.detail
    }
}

impl std::fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for NormalizedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.original
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Normalize any toolkit error into a [`NormalizedError`].
///
/// Already-normalized errors come back unchanged. Backend failures get a
/// message prefix from [`ERROR_CODES`] (or [`GENERIC_MESSAGE`]) followed by the
/// backend detail, or by the original message when there is no detail.
pub fn normalize(err: impl Into<DbError>) -> NormalizedError {
    match err.into() {
        DbError::Normalized(err) => err,
        DbError::Backend(err) => normalize_backend(err),
        other => {
            let message = compose_message(GENERIC_MESSAGE, "", &other.to_string());
            NormalizedError::new(message, UNKNOWN_CODE, "", Some(Arc::new(other)))
        }
    }
}

fn normalize_backend(err: BackendError) -> NormalizedError {
    let code = err
        .code
        .clone()
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| UNKNOWN_CODE.to_string());
    let detail = err.detail.clone().unwrap_or_default();
    let prefix = describe_code(&code).unwrap_or(GENERIC_MESSAGE);
    let message = compose_message(prefix, &detail, &err.message);

    NormalizedError::new(message, code, detail, Some(Arc::new(err)))
}

fn compose_message(prefix: &str, detail: &str, original_message: &str) -> String {
    if !detail.is_empty() {
        format!("{}: {}", prefix, detail)
    } else if !original_message.is_empty() {
        format!("{}: {}", prefix, original_message)
    } else {
        prefix.to_string()
    }
}
