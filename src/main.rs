//! pg-query-toolkit smoke check.
//!
//! Verifies that the exported operations are present and behave: error
//! normalization and query logging always, and a round trip to the database
//! when `DATABASE_URL` is set.

use clap::Parser;
use pg_query_toolkit::config::Config;
use pg_query_toolkit::error::BackendError;
use pg_query_toolkit::{ConnectionPool, QueryLogger, QueryRequest, normalize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const OPERATIONS: &[&str] = &[
    "ConnectionPool::connect",
    "ConnectionPool::execute",
    "ConnectionPool::acquire",
    "ConnectionPool::release",
    "ConnectionPool::status",
    "ConnectionPool::close",
    "with_transaction",
    "paginate",
    "normalize",
    "QueryLogger::log_query",
];

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

fn check_normalize() -> Result<(), String> {
    let err = BackendError::new(
        Some("23505".to_string()),
        Some("Key (email)=(smoke@example.com) already exists.".to_string()),
        "duplicate key value violates unique constraint",
    );
    let normalized = normalize(err);
    println!("normalize: {} [{}]", normalized.message(), normalized.code());

    if normalized.code() != "23505" || !normalized.message().starts_with("Unique constraint") {
        return Err(format!("unexpected normalization: {}", normalized.message()));
    }
    if normalize(normalized.clone()) != normalized {
        return Err("normalize is not idempotent".to_string());
    }
    Ok(())
}

fn check_logger() {
    let logger = QueryLogger::disabled();
    logger.log_query("SELECT 1", &[], Duration::from_millis(1));
    println!("log_query: ok (logging disabled)");
}

async fn check_database(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let pool_config = config.pool_config()?;
    let logger = Arc::new(QueryLogger::from_config(&config.query_logging()));
    let pool = ConnectionPool::connect(pool_config, logger).await?;

    let result = pool.execute(&QueryRequest::new("SELECT 1 AS ok")).await?;
    println!(
        "execute: {} row(s) in {}ms",
        result.row_count, result.execution_time_ms
    );

    let status = pool.status();
    println!(
        "status: size={} idle={} max={}",
        status.size, status.idle, status.max_connections
    );

    pool.close().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = Config::parse();
    init_tracing(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting smoke check");

    println!("operations:");
    for op in OPERATIONS {
        println!("  {}", op);
    }

    if let Err(e) = check_normalize() {
        error!(error = %e, "normalize check failed");
        std::process::exit(1);
    }
    check_logger();

    if config.database_url.is_some() {
        if let Err(e) = check_database(&config).await {
            error!(error = %e, "database check failed");
            std::process::exit(1);
        }
    } else {
        println!("DATABASE_URL not set, skipping database check");
    }

    info!("Smoke check complete");
}
