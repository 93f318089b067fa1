//! BoxRequestRepository -- object-safe dynamic dispatch wrapper for RequestRepository.
//!
//! 1. Define an object-safe `RequestRepositoryDyn` trait with boxed futures
//! 2. Blanket-impl `RequestRepositoryDyn` for all `T: RequestRepository`
//! 3. `BoxRequestRepository` wraps `Box<dyn RequestRepositoryDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use llmtrace_types::error::RepositoryError;
use llmtrace_types::query::{AggregateResult, GroupField, RequestFilter};
use llmtrace_types::record::RequestRecord;
use uuid::Uuid;

use super::request::RequestRepository;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Object-safe version of [`RequestRepository`] with boxed futures.
///
/// A blanket implementation is provided for all types implementing
/// `RequestRepository`.
pub trait RequestRepositoryDyn: Send + Sync {
    fn save_boxed<'a>(&'a self, record: &'a RequestRecord) -> BoxFuture<'a, ()>;

    fn get_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, Option<RequestRecord>>;

    fn get_by_trace_id_boxed<'a>(&'a self, trace_id: &'a str) -> BoxFuture<'a, Vec<RequestRecord>>;

    fn query_boxed<'a>(&'a self, filter: &'a RequestFilter) -> BoxFuture<'a, Vec<RequestRecord>>;

    fn aggregate_boxed<'a>(
        &'a self,
        group_by: &'a [GroupField],
        filter: Option<&'a RequestFilter>,
    ) -> BoxFuture<'a, Vec<AggregateResult>>;

    fn delete_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, ()>;

    fn delete_older_than_boxed(&self, before: DateTime<Utc>) -> BoxFuture<'_, u64>;

    fn close_boxed(&self) -> BoxFuture<'_, ()>;
}

impl<T: RequestRepository> RequestRepositoryDyn for T {
    fn save_boxed<'a>(&'a self, record: &'a RequestRecord) -> BoxFuture<'a, ()> {
        Box::pin(self.save(record))
    }

    fn get_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, Option<RequestRecord>> {
        Box::pin(self.get(id))
    }

    fn get_by_trace_id_boxed<'a>(&'a self, trace_id: &'a str) -> BoxFuture<'a, Vec<RequestRecord>> {
        Box::pin(self.get_by_trace_id(trace_id))
    }

    fn query_boxed<'a>(&'a self, filter: &'a RequestFilter) -> BoxFuture<'a, Vec<RequestRecord>> {
        Box::pin(self.query(filter))
    }

    fn aggregate_boxed<'a>(
        &'a self,
        group_by: &'a [GroupField],
        filter: Option<&'a RequestFilter>,
    ) -> BoxFuture<'a, Vec<AggregateResult>> {
        Box::pin(self.aggregate(group_by, filter))
    }

    fn delete_boxed<'a>(&'a self, id: &'a Uuid) -> BoxFuture<'a, ()> {
        Box::pin(self.delete(id))
    }

    fn delete_older_than_boxed(&self, before: DateTime<Utc>) -> BoxFuture<'_, u64> {
        Box::pin(self.delete_older_than(before))
    }

    fn close_boxed(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.close())
    }
}

/// Type-erased request repository.
///
/// Lets the tracker hold any storage backend without a generic parameter.
/// Since `RequestRepository` uses RPITIT it cannot be a trait object itself;
/// this wrapper provides the same methods over `RequestRepositoryDyn`.
pub struct BoxRequestRepository {
    inner: Box<dyn RequestRepositoryDyn + Send + Sync>,
}

impl BoxRequestRepository {
    /// Wrap a concrete `RequestRepository` in a type-erased box.
    pub fn new<T: RequestRepository + 'static>(repository: T) -> Self {
        Self {
            inner: Box::new(repository),
        }
    }

    pub async fn save(&self, record: &RequestRecord) -> Result<(), RepositoryError> {
        self.inner.save_boxed(record).await
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<RequestRecord>, RepositoryError> {
        self.inner.get_boxed(id).await
    }

    pub async fn get_by_trace_id(
        &self,
        trace_id: &str,
    ) -> Result<Vec<RequestRecord>, RepositoryError> {
        self.inner.get_by_trace_id_boxed(trace_id).await
    }

    pub async fn query(&self, filter: &RequestFilter) -> Result<Vec<RequestRecord>, RepositoryError> {
        self.inner.query_boxed(filter).await
    }

    pub async fn aggregate(
        &self,
        group_by: &[GroupField],
        filter: Option<&RequestFilter>,
    ) -> Result<Vec<AggregateResult>, RepositoryError> {
        self.inner.aggregate_boxed(group_by, filter).await
    }

    pub async fn delete(&self, id: &Uuid) -> Result<(), RepositoryError> {
        self.inner.delete_boxed(id).await
    }

    pub async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.inner.delete_older_than_boxed(before).await
    }

    pub async fn close(&self) -> Result<(), RepositoryError> {
        self.inner.close_boxed().await
    }
}
