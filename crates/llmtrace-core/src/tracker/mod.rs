//! Tracking orchestrator.
//!
//! `Tracker` turns the outcome of one provider call into a [`RequestRecord`]
//! and hands it to storage. The provider call's own result is always
//! returned to the caller untouched; anything that goes wrong while tracking
//! (storage errors, an open circuit, a cancelled write) is reported to the
//! injected [`TrackingLogger`] and nowhere else.
//!
//! Two dispatch modes:
//! - **Synchronous** (default): the save runs on the caller's task and the
//!   traced call returns after the save attempt completes.
//! - **Asynchronous**: the record is built and saved on a spawned task. The
//!   trace ID and dimensions are captured before spawning, and the spawned
//!   task does not observe the caller's cancellation token.

pub mod builder;
pub mod call;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use llmtrace_types::error::{RepositoryError, TrackerError};
use llmtrace_types::provider::Provider;
use llmtrace_types::query::{AggregateResult, GroupField, RequestFilter};
use llmtrace_types::record::{
    DimensionTag, RequestRecord, STATUS_ERROR, STATUS_OK, TokenUsage,
};
use llmtrace_types::stats::{TokenStats, UsageStats};

use crate::breaker::{CircuitBreaker, CircuitError, CircuitState};
use crate::classify::classify;
use crate::context::TraceContext;
use crate::logger::{LogField, TrackingLogger};
use crate::repository::{BoxRequestRepository, RequestRepository};

pub use builder::TrackerBuilder;
pub use call::{PendingRequest, ReportsUsage, TracedCall};

// ---------------------------------------------------------------------------
// Record construction
// ---------------------------------------------------------------------------

/// What happened during one provider call, before it becomes a record.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub provider: Provider,
    pub model: String,
    pub usage: TokenUsage,
    pub latency: Duration,
    /// Error message of the provider call; `None` when it succeeded.
    pub error: Option<String>,
    pub responded_at: DateTime<Utc>,
}

impl CallOutcome {
    /// Outcome of a call that returned just now.
    pub fn new(
        provider: Provider,
        model: impl Into<String>,
        usage: TokenUsage,
        latency: Duration,
        error: Option<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            usage,
            latency,
            error,
            responded_at: Utc::now(),
        }
    }
}

/// Build the persisted record for one call outcome.
///
/// Negative token counts become zero, the error is classified, and the
/// request time is derived from the response time minus the latency.
pub fn build_record(
    trace_id: String,
    dimensions: Vec<DimensionTag>,
    outcome: CallOutcome,
) -> RequestRecord {
    let error_type = classify(outcome.error.as_deref());
    let status_code = if outcome.error.is_some() {
        STATUS_ERROR
    } else {
        STATUS_OK
    };

    let elapsed = chrono::Duration::from_std(outcome.latency)
        .unwrap_or_else(|_| chrono::Duration::zero());
    let requested_at = outcome
        .responded_at
        .checked_sub_signed(elapsed)
        .unwrap_or(outcome.responded_at);

    RequestRecord {
        id: Uuid::now_v7(),
        trace_id,
        provider: outcome.provider.canonical(),
        model: outcome.model,
        input_tokens: clamp_tokens(outcome.usage.input_tokens),
        output_tokens: clamp_tokens(outcome.usage.output_tokens),
        latency: outcome.latency,
        status_code,
        error: outcome.error.unwrap_or_default(),
        error_type,
        dimensions,
        requested_at,
        responded_at: outcome.responded_at,
    }
}

fn clamp_tokens(count: i64) -> u32 {
    count.clamp(0, i64::from(u32::MAX)) as u32
}

/// Reject arguments that can never describe a real provider call.
fn validate(provider: Provider, model: String) -> Result<(Provider, String), TrackerError> {
    if let Provider::Other(name) = &provider {
        if name.trim().is_empty() {
            return Err(TrackerError::InvalidArgument(
                "provider name cannot be empty".to_string(),
            ));
        }
    }
    if model.trim().is_empty() {
        return Err(TrackerError::InvalidArgument(
            "model cannot be empty".to_string(),
        ));
    }
    Ok((provider, model))
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Records provider calls into a storage backend.
///
/// Cheap to clone; clones share storage, logger and circuit breaker.
#[derive(Clone)]
pub struct Tracker {
    storage: Arc<BoxRequestRepository>,
    logger: Arc<dyn TrackingLogger>,
    breaker: Option<Arc<CircuitBreaker>>,
    async_tracking: bool,
}

impl Tracker {
    /// Synchronous tracker with no circuit breaker and a no-op logger.
    pub fn new<R: RequestRepository + 'static>(storage: R) -> Self {
        Self::builder(storage).build()
    }

    pub fn builder<R: RequestRepository + 'static>(storage: R) -> TrackerBuilder {
        TrackerBuilder::new(BoxRequestRepository::new(storage))
    }

    pub fn is_async(&self) -> bool {
        self.async_tracking
    }

    pub fn has_circuit_breaker(&self) -> bool {
        self.breaker.is_some()
    }

    /// Prepare a traced provider call.
    ///
    /// Fails with `InvalidArgument` before anything runs when the model (or
    /// the name of a custom provider) is empty.
    pub fn trace(
        &self,
        provider: impl Into<Provider>,
        model: impl Into<String>,
    ) -> Result<TracedCall<'_>, TrackerError> {
        let (provider, model) = validate(provider.into(), model.into())?;
        Ok(TracedCall::new(self, provider, model))
    }

    /// Start timing a call that is tracked later with [`PendingRequest::finish`].
    pub fn start(
        &self,
        ctx: &TraceContext,
        provider: impl Into<Provider>,
        model: impl Into<String>,
    ) -> Result<PendingRequest<'_>, TrackerError> {
        let (provider, model) = validate(provider.into(), model.into())?;
        Ok(PendingRequest::new(self, ctx.clone(), provider, model))
    }

    /// Track a call whose usage and latency were measured by the caller.
    ///
    /// Only argument validation can fail; storage problems go to the logger.
    pub async fn track(
        &self,
        ctx: &TraceContext,
        provider: impl Into<Provider>,
        model: impl Into<String>,
        usage: TokenUsage,
        latency: Duration,
        error: Option<&str>,
    ) -> Result<(), TrackerError> {
        let (provider, model) = validate(provider.into(), model.into())?;
        let outcome = CallOutcome::new(provider, model, usage, latency, error.map(str::to_string));
        self.dispatch(ctx, outcome).await;
        Ok(())
    }

    /// Build and persist the record for `outcome` in the configured mode.
    pub(crate) async fn dispatch(&self, ctx: &TraceContext, outcome: CallOutcome) {
        let trace_id = ctx.resolve_trace_id();
        let dimensions = ctx.dimensions();

        if self.async_tracking {
            let tracker = self.clone();
            tokio::spawn(async move {
                let record = build_record(trace_id, dimensions, outcome);
                tracker.persist(&record, None).await;
            });
            return;
        }

        let record = build_record(trace_id, dimensions, outcome);
        self.persist(&record, ctx.cancellation()).await;
    }

    async fn persist(&self, record: &RequestRecord, cancellation: Option<&CancellationToken>) {
        let result = match cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(TrackerError::Cancelled),
                    result = self.save_guarded(record) => result,
                }
            }
            None => self.save_guarded(record).await,
        };

        match result {
            Ok(()) => {
                tracing::debug!(
                    id = %record.id,
                    trace_id = %record.trace_id,
                    provider = %record.provider,
                    model = %record.model,
                    "request tracked"
                );
            }
            Err(err) => self.report_failure(record, &err),
        }
    }

    /// Save through the circuit breaker when one is configured.
    async fn save_guarded(&self, record: &RequestRecord) -> Result<(), TrackerError> {
        let Some(breaker) = &self.breaker else {
            return Ok(self.storage.save(record).await?);
        };

        breaker
            .call(|| self.storage.save(record))
            .await
            .map_err(|err| match err {
                CircuitError::Open => TrackerError::CircuitOpen,
                CircuitError::Inner(err) => TrackerError::Storage(err),
            })
    }

    fn report_failure(&self, record: &RequestRecord, err: &TrackerError) {
        let fields = [
            LogField::new("error", err),
            LogField::new("provider", &record.provider),
            LogField::new("model", &record.model),
            LogField::new("input_tokens", record.input_tokens),
            LogField::new("output_tokens", record.output_tokens),
            LogField::new("trace_id", &record.trace_id),
        ];

        if err.is_circuit_open() {
            self.logger
                .warn("circuit breaker open, request not tracked", &fields);
        } else {
            self.logger.error("failed to track request", &fields);
        }
    }

    // -----------------------------------------------------------------------
    // Query surface
    // -----------------------------------------------------------------------

    pub async fn get_request(&self, id: &Uuid) -> Result<Option<RequestRecord>, RepositoryError> {
        self.storage.get(id).await
    }

    pub async fn requests_by_trace(
        &self,
        trace_id: &str,
    ) -> Result<Vec<RequestRecord>, RepositoryError> {
        self.storage.get_by_trace_id(trace_id).await
    }

    pub async fn query_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<RequestRecord>, RepositoryError> {
        self.storage.query(filter).await
    }

    pub async fn aggregates(
        &self,
        group_by: &[GroupField],
        filter: Option<&RequestFilter>,
    ) -> Result<Vec<AggregateResult>, RepositoryError> {
        self.storage.aggregate(group_by, filter).await
    }

    pub async fn delete_request(&self, id: &Uuid) -> Result<(), RepositoryError> {
        self.storage.delete(id).await
    }

    /// Remove records requested before `before`. Returns how many were removed.
    pub async fn cleanup_older_than(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let removed = self.storage.delete_older_than(before).await?;
        tracing::debug!(removed, before = %before, "old request records removed");
        Ok(removed)
    }

    pub async fn close(&self) -> Result<(), RepositoryError> {
        self.storage.close().await
    }

    /// Current breaker state, or `None` when no breaker is configured.
    pub async fn circuit_state(&self) -> Option<CircuitState> {
        match &self.breaker {
            Some(breaker) => Some(breaker.state().await),
            None => None,
        }
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    /// Token totals per `provider/model`, optionally limited to records
    /// requested at or after `since`.
    pub async fn token_stats(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<String, TokenStats>, RepositoryError> {
        let filter = since.map(RequestFilter::since).unwrap_or_default();
        let records = self.storage.query(&filter).await?;

        let mut stats: BTreeMap<String, TokenStats> = BTreeMap::new();
        for record in &records {
            let entry = stats
                .entry(format!("{}/{}", record.provider, record.model))
                .or_insert_with(|| TokenStats::new(record.provider.clone(), record.model.clone()));

            entry.total_requests += 1;
            entry.input_tokens += u64::from(record.input_tokens);
            entry.output_tokens += u64::from(record.output_tokens);
            entry.total_tokens += record.total_tokens();
            if record.has_error() {
                entry.error_count += 1;
            }
        }

        Ok(stats)
    }

    /// Usage summary over the provider/model aggregate groups.
    pub async fn usage_stats(
        &self,
        provider: Option<Provider>,
        since: Option<DateTime<Utc>>,
    ) -> Result<UsageStats, RepositoryError> {
        let filter = RequestFilter {
            provider,
            start_time: since,
            ..RequestFilter::default()
        };
        let groups = self
            .storage
            .aggregate(&[GroupField::Provider, GroupField::Model], Some(&filter))
            .await?;

        let mut stats = UsageStats::default();
        for group in &groups {
            stats.total_requests += group.total_requests;
            stats.total_tokens += group.total_tokens;
            stats.error_count += group.error_count;
            stats.max_latency = stats.max_latency.max(group.avg_latency);
        }
        if stats.total_requests > 0 {
            stats.error_rate = stats.error_count as f64 / stats.total_requests as f64 * 100.0;
        }

        Ok(stats)
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("async_tracking", &self.async_tracking)
            .field("circuit_breaker", &self.breaker.is_some())
            .finish_non_exhaustive()
    }
}
