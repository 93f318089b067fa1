//! SQLite request repository implementation.
//!
//! Implements `RequestRepository` from `llmtrace-core` using sqlx with split
//! read/write pools. Dimension tags live in the `request_dimensions` child
//! table and are removed with their request via `ON DELETE CASCADE`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use uuid::Uuid;

use llmtrace_core::repository::RequestRepository;
use llmtrace_types::error::RepositoryError;
use llmtrace_types::provider::Provider;
use llmtrace_types::query::{AggregateResult, GroupField, OrderBy, RequestFilter, SortOrder};
use llmtrace_types::record::{DimensionTag, ErrorType, RequestRecord};

use super::pool::DatabasePool;

/// Request IDs per `IN (...)` lookup when loading dimensions.
const DIMENSION_BATCH: usize = 500;

/// SQLite-backed implementation of `RequestRepository`.
pub struct SqliteRequestRepository {
    pool: DatabasePool,
}

impl SqliteRequestRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Open (and migrate) the database at `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = DatabasePool::new(database_url).await.map_err(|e| {
            tracing::error!(database_url, error = %e, "failed to open request database");
            RepositoryError::Connection
        })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Fetch request rows and attach their dimension tags.
    async fn fetch_records(
        &self,
        sql: &str,
        params: &[Param],
    ) -> Result<Vec<RequestRecord>, RepositoryError> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut request_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            request_rows
                .push(RequestRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?);
        }

        let ids: Vec<&str> = request_rows.iter().map(|r| r.id.as_str()).collect();
        let mut dimensions = self.load_dimensions(&ids).await?;

        request_rows
            .into_iter()
            .map(|row| {
                let tags = dimensions.remove(&row.id).unwrap_or_default();
                row.into_record(tags)
            })
            .collect()
    }

    async fn load_dimensions(
        &self,
        ids: &[&str],
    ) -> Result<HashMap<String, Vec<DimensionTag>>, RepositoryError> {
        let mut dimensions: HashMap<String, Vec<DimensionTag>> = HashMap::new();

        for batch in ids.chunks(DIMENSION_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT request_id, key, value FROM request_dimensions \
                 WHERE request_id IN ({placeholders}) ORDER BY request_id, position"
            );

            let mut query = sqlx::query(&sql);
            for id in batch {
                query = query.bind(*id);
            }
            let rows = query
                .fetch_all(&self.pool.reader)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

            for row in &rows {
                let request_id: String = row
                    .try_get("request_id")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let key: String = row
                    .try_get("key")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let value: String = row
                    .try_get("value")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                dimensions
                    .entry(request_id)
                    .or_default()
                    .push(DimensionTag::new(key, value));
            }
        }

        Ok(dimensions)
    }
}

impl RequestRepository for SqliteRequestRepository {
    async fn save(&self, record: &RequestRecord) -> Result<(), RepositoryError> {
        // Request row and its dimensions are written in one transaction.
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let id = record.id.to_string();
        sqlx::query(
            "INSERT INTO requests (id, trace_id, provider, model, input_tokens, output_tokens, latency_ns, status_code, error, error_type, requested_at, responded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&record.trace_id)
        .bind(record.provider.as_str())
        .bind(&record.model)
        .bind(i64::from(record.input_tokens))
        .bind(i64::from(record.output_tokens))
        .bind(duration_to_nanos(record.latency))
        .bind(i64::from(record.status_code))
        .bind(&record.error)
        .bind(record.error_type.as_str())
        .bind(format_datetime(&record.requested_at))
        .bind(format_datetime(&record.responded_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.message().contains("UNIQUE") {
                    return RepositoryError::Conflict(format!(
                        "request {} already exists",
                        record.id
                    ));
                }
            }
            RepositoryError::Query(e.to_string())
        })?;

        for (position, tag) in record.dimensions.iter().enumerate() {
            sqlx::query(
                "INSERT INTO request_dimensions (request_id, position, key, value) VALUES (?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(position as i64)
            .bind(&tag.key)
            .bind(&tag.value)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<RequestRecord>, RepositoryError> {
        let records = self
            .fetch_records(
                "SELECT * FROM requests WHERE id = ?",
                &[Param::Text(id.to_string())],
            )
            .await?;
        Ok(records.into_iter().next())
    }

    async fn get_by_trace_id(&self, trace_id: &str) -> Result<Vec<RequestRecord>, RepositoryError> {
        self.fetch_records(
            "SELECT * FROM requests WHERE trace_id = ? ORDER BY requested_at ASC, id ASC",
            &[Param::Text(trace_id.to_string())],
        )
        .await
    }

    async fn query(&self, filter: &RequestFilter) -> Result<Vec<RequestRecord>, RepositoryError> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT * FROM requests{}", where_clause(filter, &mut params));

        let column = match filter.order_by {
            OrderBy::RequestedAt => "requested_at",
            OrderBy::Latency => "latency_ns",
            OrderBy::TotalTokens => "(input_tokens + output_tokens)",
        };
        let order = match filter.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {column} {order}, id {order}"));

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        match (filter.limit, filter.offset) {
            (Some(limit), offset) => {
                sql.push_str(&format!(" LIMIT {limit}"));
                if let Some(offset) = offset {
                    sql.push_str(&format!(" OFFSET {offset}"));
                }
            }
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        self.fetch_records(&sql, &params).await
    }

    async fn aggregate(
        &self,
        group_by: &[GroupField],
        filter: Option<&RequestFilter>,
    ) -> Result<Vec<AggregateResult>, RepositoryError> {
        let by_provider = group_by.contains(&GroupField::Provider);
        let by_model = group_by.contains(&GroupField::Model);

        let mut columns = Vec::new();
        if by_provider {
            columns.push("provider");
        }
        if by_model {
            columns.push("model");
        }
        let columns = columns.join(", ");

        let mut params = Vec::new();
        let where_sql = filter
            .map(|f| where_clause(f, &mut params))
            .unwrap_or_default();

        let select_prefix = if columns.is_empty() {
            String::new()
        } else {
            format!("{columns}, ")
        };
        let mut sql = format!(
            "SELECT {select_prefix}COUNT(*) AS total_requests, \
             COALESCE(SUM(input_tokens + output_tokens), 0) AS total_tokens, \
             COALESCE(AVG(latency_ns), 0.0) AS avg_latency_ns, \
             COALESCE(SUM(CASE WHEN error != '' THEN 1 ELSE 0 END), 0) AS error_count \
             FROM requests{where_sql}"
        );
        if !columns.is_empty() {
            sql.push_str(&format!(" GROUP BY {columns} ORDER BY {columns}"));
        }

        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let aggregate = AggregateRow::from_row(row, by_provider, by_model)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            // An ungrouped aggregate over no rows still yields one row.
            if aggregate.total_requests == 0 {
                continue;
            }
            results.push(aggregate.into_result());
        }

        Ok(results)
    }

    async fn delete(&self, id: &Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM requests WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM requests WHERE requested_at < ?")
            .bind(format_datetime(&before))
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        self.pool.close().await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Query building
// ---------------------------------------------------------------------------

enum Param {
    Text(String),
    Int(i64),
}

/// ` WHERE ...` for every set filter field, or an empty string.
fn where_clause(filter: &RequestFilter, params: &mut Vec<Param>) -> String {
    let mut conditions: Vec<&'static str> = Vec::new();

    if let Some(trace_id) = &filter.trace_id {
        conditions.push("trace_id = ?");
        params.push(Param::Text(trace_id.clone()));
    }
    if let Some(provider) = &filter.provider {
        conditions.push("provider = ?");
        params.push(Param::Text(provider.to_string()));
    }
    if let Some(model) = &filter.model {
        conditions.push("model = ?");
        params.push(Param::Text(model.clone()));
    }
    if let Some(error_type) = filter.error_type {
        conditions.push("error_type = ?");
        params.push(Param::Text(error_type.as_str().to_string()));
    }
    if let Some(start) = &filter.start_time {
        conditions.push("requested_at >= ?");
        params.push(Param::Text(format_datetime(start)));
    }
    if let Some(end) = &filter.end_time {
        conditions.push("requested_at <= ?");
        params.push(Param::Text(format_datetime(end)));
    }
    if let Some(min) = filter.min_tokens {
        conditions.push("(input_tokens + output_tokens) >= ?");
        params.push(Param::Int(i64::try_from(min).unwrap_or(i64::MAX)));
    }
    if let Some(max) = filter.max_tokens {
        conditions.push("(input_tokens + output_tokens) <= ?");
        params.push(Param::Int(i64::try_from(max).unwrap_or(i64::MAX)));
    }
    match filter.has_error {
        Some(true) => conditions.push("error != ''"),
        Some(false) => conditions.push("error = ''"),
        None => {}
    }
    for tag in &filter.dimensions {
        conditions.push(
            "EXISTS (SELECT 1 FROM request_dimensions d \
             WHERE d.request_id = requests.id AND d.key = ? AND d.value = ?)",
        );
        params.push(Param::Text(tag.key.clone()));
        params.push(Param::Text(tag.value.clone()));
    }

    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Param],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Param::Text(value) => query.bind(value.clone()),
            Param::Int(value) => query.bind(*value),
        };
    }
    query
}

// ---------------------------------------------------------------------------
// Private Row types
// ---------------------------------------------------------------------------

struct RequestRow {
    id: String,
    trace_id: String,
    provider: String,
    model: String,
    input_tokens: i64,
    output_tokens: i64,
    latency_ns: i64,
    status_code: i64,
    error: String,
    error_type: String,
    requested_at: String,
    responded_at: String,
}

impl RequestRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            trace_id: row.try_get("trace_id")?,
            provider: row.try_get("provider")?,
            model: row.try_get("model")?,
            input_tokens: row.try_get("input_tokens")?,
            output_tokens: row.try_get("output_tokens")?,
            latency_ns: row.try_get("latency_ns")?,
            status_code: row.try_get("status_code")?,
            error: row.try_get("error")?,
            error_type: row.try_get("error_type")?,
            requested_at: row.try_get("requested_at")?,
            responded_at: row.try_get("responded_at")?,
        })
    }

    fn into_record(self, dimensions: Vec<DimensionTag>) -> Result<RequestRecord, RepositoryError> {
        let error_type: ErrorType = self
            .error_type
            .parse()
            .map_err(RepositoryError::Query)?;

        Ok(RequestRecord {
            id: parse_uuid(&self.id)?,
            trace_id: self.trace_id,
            provider: Provider::from(self.provider),
            model: self.model,
            input_tokens: self.input_tokens as u32,
            output_tokens: self.output_tokens as u32,
            latency: Duration::from_nanos(self.latency_ns.max(0) as u64),
            status_code: self.status_code as u16,
            error: self.error,
            error_type,
            dimensions,
            requested_at: parse_datetime(&self.requested_at)?,
            responded_at: parse_datetime(&self.responded_at)?,
        })
    }
}

struct AggregateRow {
    provider: Option<String>,
    model: Option<String>,
    total_requests: i64,
    total_tokens: i64,
    avg_latency_ns: f64,
    error_count: i64,
}

impl AggregateRow {
    fn from_row(
        row: &sqlx::sqlite::SqliteRow,
        by_provider: bool,
        by_model: bool,
    ) -> Result<Self, sqlx::Error> {
        Ok(Self {
            provider: if by_provider {
                Some(row.try_get("provider")?)
            } else {
                None
            },
            model: if by_model {
                Some(row.try_get("model")?)
            } else {
                None
            },
            total_requests: row.try_get("total_requests")?,
            total_tokens: row.try_get("total_tokens")?,
            avg_latency_ns: row.try_get("avg_latency_ns")?,
            error_count: row.try_get("error_count")?,
        })
    }

    fn into_result(self) -> AggregateResult {
        AggregateResult {
            provider: self.provider.map(Provider::from),
            model: self.model,
            total_requests: self.total_requests as u64,
            total_tokens: self.total_tokens as u64,
            avg_latency: Duration::from_nanos(self.avg_latency_ns.max(0.0).round() as u64),
            error_count: self.error_count as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 in UTC, so text comparison orders chronologically.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn duration_to_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}
