//! PostgreSQL integration tests. Require `TEST_POSTGRES_URL`.

use pg_query_toolkit::config::PoolConfig;
use pg_query_toolkit::error::DbError;
use pg_query_toolkit::logging::QueryLogger;
use pg_query_toolkit::{ConnectionPool, PageRequest, QueryParam, paginate, with_transaction};
use serde_json::json;
use sqlx::types::BigDecimal;
use std::sync::Arc;

async fn connect(url: String) -> ConnectionPool {
    let config = PoolConfig::new(url).unwrap().with_max_connections(4);
    ConnectionPool::connect(config, Arc::new(QueryLogger::default()))
        .await
        .unwrap()
}

fn table_name(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

#[tokio::test]
async fn test_postgres_unique_violation_is_normalized() {
    let postgres_url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };

    let pool = connect(postgres_url).await;
    let table = table_name("users");

    pool.query(
        format!("CREATE TABLE {} (id SERIAL PRIMARY KEY, email TEXT UNIQUE NOT NULL)", table),
        vec![],
    )
    .await
    .unwrap();

    let insert = format!("INSERT INTO {} (email) VALUES ($1)", table);
    pool.query(insert.clone(), vec!["dup@example.com".into()])
        .await
        .unwrap();
    let err = pool
        .query(insert, vec!["dup@example.com".into()])
        .await
        .unwrap_err();

    match err {
        DbError::Normalized(normalized) => {
            assert_eq!(normalized.code(), "23505");
            assert_eq!(normalized.detail(), "Key (email)=(dup@example.com) already exists.");
            assert_eq!(
                normalized.message(),
                "Unique constraint violation: Key (email)=(dup@example.com) already exists."
            );
            assert!(normalized.is_known_code());
        }
        other => panic!("expected normalized error, got {:?}", other),
    }

    pool.query(format!("DROP TABLE {}", table), vec![])
        .await
        .unwrap();
    pool.close().await;
}

#[tokio::test]
async fn test_postgres_undefined_table_is_normalized() {
    let postgres_url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };

    let pool = connect(postgres_url).await;
    let err = pool
        .query("SELECT * FROM table_that_does_not_exist", vec![])
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some("42P01"));
    match err {
        DbError::Normalized(normalized) => {
            assert!(normalized.message().starts_with("Undefined table: "));
            assert!(normalized.message().contains("table_that_does_not_exist"));
        }
        other => panic!("expected normalized error, got {:?}", other),
    }
    pool.close().await;
}

#[tokio::test]
async fn test_postgres_value_decoding() {
    let postgres_url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };

    let pool = connect(postgres_url).await;
    let result = pool
        .query(
            "SELECT 42::int4 AS small, 9000000000::int8 AS big, 12.50::numeric AS amount, \
             'NaN'::numeric AS nan, true AS flag, '{\"a\": 1}'::jsonb AS doc, \
             'a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11'::uuid AS id, \
             '\\xdeadbeef'::bytea AS bytes, '2024-01-02'::date AS day, \
             NULL::text AS missing, $1::text AS echoed",
            vec![QueryParam::from("hello")],
        )
        .await
        .unwrap();

    let row = &result.rows[0];
    assert_eq!(row["small"], json!(42));
    assert_eq!(row["big"], json!(9_000_000_000i64));
    let amount: BigDecimal = row["amount"].as_str().unwrap().parse().unwrap();
    assert_eq!(amount, "12.50".parse::<BigDecimal>().unwrap());
    assert_eq!(row["nan"], json!("NaN"));
    assert_eq!(row["flag"], json!(true));
    assert_eq!(row["doc"], json!({"a": 1}));
    assert_eq!(row["id"], json!("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"));
    assert_eq!(row["bytes"], json!("3q2+7w=="));
    assert_eq!(row["day"], json!("2024-01-02"));
    assert_eq!(row["missing"], json!(null));
    assert_eq!(row["echoed"], json!("hello"));
    pool.close().await;
}

#[tokio::test]
async fn test_postgres_interval_array_and_network_decoding() {
    let postgres_url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };

    let pool = connect(postgres_url).await;
    let sql = "SELECT INTERVAL '1 day 02:00:00' AS iv, ARRAY[1, NULL, 3]::int4[] AS arr, \
               ARRAY['a', 'b']::text[] AS tags, '127.0.0.1'::inet AS ip, \
               '10.0.0.0/8'::cidr AS net, 'NaN'::numeric AS nan, $1::text AS t";

    // With a parameter the row comes back in binary format
    let result = pool
        .query(sql, vec![QueryParam::from("p")])
        .await
        .unwrap();
    let row = &result.rows[0];
    assert_eq!(row["iv"], json!("1 day 02:00:00"));
    assert_eq!(row["arr"], json!([1, null, 3]));
    assert_eq!(row["tags"], json!(["a", "b"]));
    assert_eq!(row["ip"], json!("127.0.0.1"));
    assert_eq!(row["net"], json!("10.0.0.0/8"));
    assert_eq!(row["nan"], json!("NaN"));
    assert_eq!(row["t"], json!("p"));

    // Without parameters it comes back as text
    let result = pool
        .query(sql.replace("$1::text", "'p'::text"), vec![])
        .await
        .unwrap();
    let row = &result.rows[0];
    assert_eq!(row["iv"], json!("1 day 02:00:00"));
    assert_eq!(row["ip"], json!("127.0.0.1"));
    assert_eq!(row["nan"], json!("NaN"));
    assert!(!row["arr"].is_null());
    assert!(!row["tags"].is_null());
    pool.close().await;
}

#[tokio::test]
async fn test_postgres_rollback_failure_keeps_original_error() {
    let postgres_url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };

    let config = PoolConfig::new(postgres_url)
        .unwrap()
        .with_max_connections(1);
    let pool = ConnectionPool::connect(config, Arc::new(QueryLogger::default()))
        .await
        .unwrap();

    // Killing the session fails the unit of work and then the ROLLBACK
    let result: Result<(), DbError> = with_transaction(&pool, |conn| {
        Box::pin(async move {
            conn.query("SELECT pg_terminate_backend(pg_backend_pid())", vec![])
                .await?;
            Ok(())
        })
    })
    .await;

    match result {
        Err(DbError::Normalized(normalized)) => {
            assert!(normalized.message().contains("terminating connection"));
        }
        other => panic!("expected the unit of work's error, got {:?}", other),
    }

    // The single slot is usable again
    let result = pool.query("SELECT 1 AS one", vec![]).await.unwrap();
    assert_eq!(result.rows[0]["one"], json!(1));
    pool.close().await;
}

#[tokio::test]
async fn test_postgres_transaction_and_pagination() {
    let postgres_url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };

    let pool = connect(postgres_url).await;
    let table = table_name("items");

    pool.query(
        format!("CREATE TABLE {} (id INT PRIMARY KEY)", table),
        vec![],
    )
    .await
    .unwrap();

    let insert = format!("INSERT INTO {} SELECT generate_series(1, 25)", table);
    with_transaction(&pool, |conn| {
        Box::pin(async move {
            conn.query(insert, vec![]).await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    let failed: Result<(), DbError> = with_transaction(&pool, |conn| {
        let insert = format!("INSERT INTO {} VALUES (100)", table);
        Box::pin(async move {
            conn.query(insert, vec![]).await?;
            conn.query("SELECT 1/0", vec![]).await?;
            Ok(())
        })
    })
    .await;
    assert!(failed.is_err());

    let page = paginate(
        &pool,
        &format!("SELECT id FROM {} ORDER BY id", table),
        PageRequest::new(3, 10),
        &[],
    )
    .await
    .unwrap();

    assert_eq!(page.data.len(), 5);
    assert_eq!(page.data[0]["id"], json!(21));
    assert_eq!(page.pagination.total_records, 25);
    assert_eq!(page.pagination.total_pages, 3);
    assert!(!page.pagination.has_next);

    pool.query(format!("DROP TABLE {}", table), vec![])
        .await
        .unwrap();
    pool.close().await;
}
