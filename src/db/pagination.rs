//! Offset pagination.
//!
//! [`paginate`] runs two queries derived from a caller's base query: a count
//! over the whole result and the requested window. The base query is wrapped
//! textually, so it must be a single SELECT without its own LIMIT/OFFSET.
//! Window parameters are appended after the caller's positional parameters.

use crate::db::executor::{Executor, params_for_log};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam, QueryRequest, QueryResult, Record};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use tracing::{debug, error};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Requested page, 1-based. Out-of-range values are clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: i64,
    page_size: i64,
}

impl PageRequest {
    pub fn new(page: i64, page_size: i64) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    /// Build from untrusted text such as query-string values.
    ///
    /// The leading integer is used (`"3abc"` is page 3); anything without
    /// one becomes 1.
    pub fn from_raw(page: &str, page_size: &str) -> Self {
        Self::new(
            leading_integer(page).unwrap_or(1),
            leading_integer(page_size).unwrap_or(1),
        )
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    /// Rows to skip before this page.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE, DEFAULT_PAGE_SIZE)
    }
}

fn leading_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let digits_start = usize::from(trimmed.starts_with(['-', '+']));
    let digits_len = trimmed[digits_start..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits_len == 0 {
        return None;
    }
    let number = &trimmed[..digits_start + digits_len];
    // Overlong digit runs saturate rather than fall back to 1
    Some(number.parse::<i64>().unwrap_or(if number.starts_with('-') {
        i64::MIN
    } else {
        i64::MAX
    }))
}

/// Pagination metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: i64,
    pub page_size: i64,
    pub total_records: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PaginationMeta {
    pub fn compute(request: PageRequest, total_records: i64) -> Self {
        let total_records = total_records.max(0);
        let page_size = request.page_size();
        let total_pages =
            total_records / page_size + i64::from(total_records % page_size != 0);

        Self {
            page: request.page(),
            page_size,
            total_records,
            total_pages,
            has_next: request.page() < total_pages,
            has_prev: request.page() > 1,
        }
    }
}

/// One page of rows plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginationResult {
    pub data: Vec<Record>,
    pub pagination: PaginationMeta,
}

/// Fetch one page of `base_query`.
///
/// On a pool the count and the window run concurrently; on a single
/// connection (e.g. inside [`with_transaction`](crate::db::with_transaction))
/// they run one after the other and see the same transaction.
pub async fn paginate<E: Executor>(
    mut executor: E,
    base_query: &str,
    page: PageRequest,
    params: &[QueryParam],
) -> DbResult<PaginationResult> {
    let outcome = async {
        let base = prepare_base_query(base_query, executor.db_type())?;
        let count = QueryRequest::with_params(build_count_query(&base), params.to_vec());
        let window = QueryRequest::with_params(
            build_page_query(&base, params.len()),
            page_params(params, page),
        );

        let (count_result, data_result) = executor.execute_pair(&count, &window).await?;
        let total_records = parse_count(&count_result)?;

        Ok::<_, DbError>(PaginationResult {
            data: data_result.rows,
            pagination: PaginationMeta::compute(page, total_records),
        })
    }
    .await;

    match outcome {
        Ok(result) => {
            debug!(
                page = result.pagination.page,
                page_size = result.pagination.page_size,
                total_records = result.pagination.total_records,
                "Page fetched"
            );
            Ok(result)
        }
        Err(err) => {
            let err = err.normalized();
            error!(
                base_query = %base_query,
                page = page.page(),
                page_size = page.page_size(),
                params = %params_for_log(params),
                error = %err,
                "Pagination error"
            );
            Err(err)
        }
    }
}

/// Strip trailing terminators and reject base queries that cannot be wrapped.
///
/// Queries the parser understands must be a single query statement without
/// LIMIT, OFFSET or FETCH. Queries it cannot parse are passed through for the
/// backend to judge.
pub fn prepare_base_query(query: &str, db_type: DatabaseType) -> DbResult<String> {
    let trimmed = query
        .trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if trimmed.is_empty() {
        return Err(DbError::invalid_input("base query is empty"));
    }

    let dialect = get_dialect(db_type);
    let Ok(statements) = Parser::parse_sql(dialect.as_ref(), trimmed) else {
        debug!(query = %trimmed, "Base query not understood by parser, passing through");
        return Ok(trimmed.to_string());
    };

    match statements.as_slice() {
        [Statement::Query(query)] => {
            if query.limit_clause.is_some() || query.fetch.is_some() {
                return Err(DbError::invalid_input(
                    "base query must not contain LIMIT, OFFSET or FETCH",
                ));
            }
            Ok(trimmed.to_string())
        }
        [_] => Err(DbError::invalid_input("base query must be a SELECT query")),
        _ => Err(DbError::invalid_input(
            "base query must be a single statement",
        )),
    }
}

fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// The base query sits on its own line so a trailing `--` comment ends there.
pub fn build_count_query(base: &str) -> String {
    format!("SELECT COUNT(*) FROM (\n{}\n) AS count_query", base)
}

/// Append the window clause; its placeholders follow the caller's `param_count`.
pub fn build_page_query(base: &str, param_count: usize) -> String {
    format!(
        "{}\nLIMIT ${} OFFSET ${}",
        base,
        param_count + 1,
        param_count + 2
    )
}

fn page_params(params: &[QueryParam], page: PageRequest) -> Vec<QueryParam> {
    let mut all = Vec::with_capacity(params.len() + 2);
    all.extend_from_slice(params);
    all.push(QueryParam::Int(page.page_size()));
    all.push(QueryParam::Int(page.offset()));
    all
}

fn parse_count(result: &QueryResult) -> DbResult<i64> {
    let count = match result.scalar() {
        Some(JsonValue::Number(n)) => n.as_i64(),
        Some(JsonValue::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    count.ok_or_else(|| DbError::invalid_input("count query did not return an integer"))
}
