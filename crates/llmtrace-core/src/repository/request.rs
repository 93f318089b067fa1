//! Request record repository trait definition.
//!
//! Defines the storage contract the tracker writes through and the query
//! surface used for reporting. The infrastructure layer (llmtrace-infra)
//! implements this trait in memory and on SQLite.

use chrono::{DateTime, Utc};
use llmtrace_types::error::RepositoryError;
use llmtrace_types::query::{AggregateResult, GroupField, RequestFilter};
use llmtrace_types::record::RequestRecord;
use uuid::Uuid;

/// Repository trait for tracked request persistence.
///
/// Cancellation is expressed by dropping the returned future; implementations
/// must leave storage consistent when that happens mid-operation.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait RequestRepository: Send + Sync {
    /// Persist one record.
    fn save(
        &self,
        record: &RequestRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Fetch a record by ID. Returns `None` if it does not exist.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<RequestRecord>, RepositoryError>> + Send;

    /// All records sharing a trace ID, ordered by `requested_at` ASC.
    fn get_by_trace_id(
        &self,
        trace_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<RequestRecord>, RepositoryError>> + Send;

    /// Records matching the filter, ordered and paginated as it specifies.
    fn query(
        &self,
        filter: &RequestFilter,
    ) -> impl std::future::Future<Output = Result<Vec<RequestRecord>, RepositoryError>> + Send;

    /// Per-group totals. An empty `group_by` yields a single group over all
    /// matching records (none when nothing matches).
    fn aggregate(
        &self,
        group_by: &[GroupField],
        filter: Option<&RequestFilter>,
    ) -> impl std::future::Future<Output = Result<Vec<AggregateResult>, RepositoryError>> + Send;

    /// Delete a record. Returns `NotFound` if it does not exist.
    fn delete(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete every record with `requested_at` before `before`. Returns the count.
    fn delete_older_than(
        &self,
        before: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Release held resources (connections, file handles).
    fn close(&self) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
