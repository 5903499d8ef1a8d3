//! Query logging.
//!
//! [`QueryLogger`] decides whether and how an executed query is reported;
//! a [`QueryRecorder`] decides where the report goes. The enabled flag is
//! read on every call, so logging can be switched on and off at runtime.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{DEFAULT_SLOW_QUERY_THRESHOLD_MS, QueryLogConfig};
use crate::models::QueryParam;

/// Tracing target for query records.
pub const QUERY_LOG_TARGET: &str = "pg_query_toolkit::query";

/// One executed query, as handed to a [`QueryRecorder`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLogEntry {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<QueryParam>>,
    pub slow: bool,
    pub slow_threshold_ms: u64,
}

/// Sink for query log entries. Implementations must not block or fail.
pub trait QueryRecorder: Send + Sync {
    fn record(&self, entry: &QueryLogEntry);
}

/// Discards every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl QueryRecorder for NoopRecorder {
    fn record(&self, _entry: &QueryLogEntry) {}
}

/// Emits entries as `tracing` events under [`QUERY_LOG_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl QueryRecorder for TracingRecorder {
    fn record(&self, entry: &QueryLogEntry) {
        let params = entry
            .params
            .as_ref()
            .and_then(|p| serde_json::to_string(p).ok());

        info!(
            target: QUERY_LOG_TARGET,
            timestamp = %entry.timestamp.to_rfc3339(),
            duration_ms = entry.duration_ms,
            sql = %entry.sql,
            params = params.as_deref(),
            slow = entry.slow,
            "Query executed"
        );

        if entry.slow {
            warn!(
                target: QUERY_LOG_TARGET,
                duration_ms = entry.duration_ms,
                threshold_ms = entry.slow_threshold_ms,
                sql = %entry.sql,
                "Slow query detected"
            );
        }
    }
}

/// Configuration-gated query observer.
pub struct QueryLogger {
    enabled: AtomicBool,
    slow_threshold: Duration,
    recorder: Arc<dyn QueryRecorder>,
}

impl QueryLogger {
    pub fn new(enabled: bool, slow_threshold: Duration, recorder: Arc<dyn QueryRecorder>) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            slow_threshold,
            recorder,
        }
    }

    /// Logger that records nothing until enabled, and then only to a no-op sink.
    pub fn disabled() -> Self {
        Self::new(
            false,
            Duration::from_millis(DEFAULT_SLOW_QUERY_THRESHOLD_MS),
            Arc::new(NoopRecorder),
        )
    }

    /// Logger writing to `tracing` with the configured flag and threshold.
    pub fn from_config(config: &QueryLogConfig) -> Self {
        Self::new(
            config.enabled,
            config.slow_threshold,
            Arc::new(TracingRecorder),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Record one executed query. No-op while disabled.
    pub fn log_query(&self, sql: &str, params: &[QueryParam], duration: Duration) {
        if !self.is_enabled() {
            return;
        }

        let entry = QueryLogEntry {
            timestamp: Utc::now(),
            duration_ms: duration_millis(duration),
            sql: sql.to_string(),
            params: (!params.is_empty()).then(|| params.to_vec()),
            slow: duration >= self.slow_threshold,
            slow_threshold_ms: duration_millis(self.slow_threshold),
        };
        self.recorder.record(&entry);
    }
}

impl Default for QueryLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for QueryLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryLogger")
            .field("enabled", &self.is_enabled())
            .field("slow_threshold", &self.slow_threshold)
            .finish_non_exhaustive()
    }
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
