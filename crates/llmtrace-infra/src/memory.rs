//! In-memory request repository.
//!
//! Keeps records in a `Vec` behind a tokio `RwLock`. Implements the full
//! filter, ordering and aggregation semantics of the SQLite adapter, which
//! makes it suitable for tests and short-lived processes.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use llmtrace_core::repository::RequestRepository;
use llmtrace_types::error::RepositoryError;
use llmtrace_types::provider::Provider;
use llmtrace_types::query::{AggregateResult, GroupField, OrderBy, RequestFilter, SortOrder};
use llmtrace_types::record::RequestRecord;

#[derive(Debug, Default)]
pub struct InMemoryRequestRepository {
    records: RwLock<Vec<RequestRecord>>,
}

impl InMemoryRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl RequestRepository for InMemoryRequestRepository {
    async fn save(&self, record: &RequestRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(RepositoryError::Conflict(format!(
                "request {} already exists",
                record.id
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<RequestRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == *id).cloned())
    }

    async fn get_by_trace_id(&self, trace_id: &str) -> Result<Vec<RequestRecord>, RepositoryError> {
        let filter = RequestFilter {
            trace_id: Some(trace_id.to_string()),
            ..RequestFilter::default()
        };
        self.query(&filter).await
    }

    async fn query(&self, filter: &RequestFilter) -> Result<Vec<RequestRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut matched: Vec<RequestRecord> = records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        drop(records);

        sort_records(&mut matched, filter.order_by, filter.order);

        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l as usize);
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn aggregate(
        &self,
        group_by: &[GroupField],
        filter: Option<&RequestFilter>,
    ) -> Result<Vec<AggregateResult>, RepositoryError> {
        let records = self.records.read().await;
        let by_provider = group_by.contains(&GroupField::Provider);
        let by_model = group_by.contains(&GroupField::Model);

        let mut groups: BTreeMap<(Option<String>, Option<String>), Group> = BTreeMap::new();
        for record in records.iter().filter(|r| filter.is_none_or(|f| f.matches(r))) {
            let key = (
                by_provider.then(|| record.provider.to_string()),
                by_model.then(|| record.model.clone()),
            );
            groups.entry(key).or_default().add(record);
        }

        Ok(groups
            .into_iter()
            .map(|((provider, model), group)| group.into_result(provider.map(Provider::from), model))
            .collect())
    }

    async fn delete(&self, id: &Uuid) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let Some(index) = records.iter().position(|r| r.id == *id) else {
            return Err(RepositoryError::NotFound);
        };
        records.remove(index);
        Ok(())
    }

    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut records = self.records.write().await;
        let count = records.len();
        records.retain(|r| r.requested_at >= before);
        Ok((count - records.len()) as u64)
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

/// Order by the requested column, then by ID so ties are stable across calls.
fn sort_records(records: &mut [RequestRecord], order_by: OrderBy, order: SortOrder) {
    records.sort_by(|a, b| {
        let primary = match order_by {
            OrderBy::RequestedAt => a.requested_at.cmp(&b.requested_at),
            OrderBy::Latency => a.latency.cmp(&b.latency),
            OrderBy::TotalTokens => a.total_tokens().cmp(&b.total_tokens()),
        };
        let ordering = primary.then_with(|| a.id.cmp(&b.id));
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

#[derive(Default)]
struct Group {
    requests: u64,
    tokens: u64,
    latency: Duration,
    errors: u64,
}

impl Group {
    fn add(&mut self, record: &RequestRecord) {
        self.requests += 1;
        self.tokens += record.total_tokens();
        self.latency += record.latency;
        if record.has_error() {
            self.errors += 1;
        }
    }

    fn into_result(self, provider: Option<Provider>, model: Option<String>) -> AggregateResult {
        let avg_latency = match u32::try_from(self.requests) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.latency / n,
            Err(_) => Duration::from_secs_f64(self.latency.as_secs_f64() / self.requests as f64),
        };
        AggregateResult {
            provider,
            model,
            total_requests: self.requests,
            total_tokens: self.tokens,
            avg_latency,
            error_count: self.errors,
        }
    }
}
