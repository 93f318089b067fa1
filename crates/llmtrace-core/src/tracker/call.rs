//! Wrapping provider calls.
//!
//! [`TracedCall`] times a provider future, reads token usage from its
//! response and tracks the outcome, then returns the future's own result.
//! [`PendingRequest`] does the same for calls the caller drives itself.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use llmtrace_types::provider::Provider;
use llmtrace_types::record::TokenUsage;

use super::{CallOutcome, Tracker};
use crate::context::TraceContext;

/// Response types that carry token usage.
pub trait ReportsUsage {
    fn token_usage(&self) -> Option<TokenUsage>;
}

impl ReportsUsage for TokenUsage {
    fn token_usage(&self) -> Option<TokenUsage> {
        Some(*self)
    }
}

impl<T: ReportsUsage> ReportsUsage for Option<T> {
    fn token_usage(&self) -> Option<TokenUsage> {
        self.as_ref().and_then(ReportsUsage::token_usage)
    }
}

impl<T: ReportsUsage + ?Sized> ReportsUsage for Box<T> {
    fn token_usage(&self) -> Option<TokenUsage> {
        (**self).token_usage()
    }
}

/// A validated provider/model pair ready to wrap one call.
///
/// Created by [`Tracker::trace`].
#[derive(Debug)]
pub struct TracedCall<'a> {
    tracker: &'a Tracker,
    provider: Provider,
    model: String,
}

impl<'a> TracedCall<'a> {
    pub(crate) fn new(tracker: &'a Tracker, provider: Provider, model: String) -> Self {
        Self {
            tracker,
            provider,
            model,
        }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Await `call`, track it, and return its result unchanged.
    pub async fn run<F, R, E>(self, ctx: &TraceContext, call: F) -> Result<R, E>
    where
        F: Future<Output = Result<R, E>>,
        R: ReportsUsage,
        E: fmt::Display,
    {
        self.run_with(ctx, call, |response: &R| response.token_usage())
            .await
    }

    /// Like [`run`](Self::run), reading usage with `usage` instead of
    /// [`ReportsUsage`]. Usage is only read from successful responses.
    pub async fn run_with<F, R, E, U>(self, ctx: &TraceContext, call: F, usage: U) -> Result<R, E>
    where
        F: Future<Output = Result<R, E>>,
        E: fmt::Display,
        U: FnOnce(&R) -> Option<TokenUsage>,
    {
        let started = Instant::now();
        let result = call.await;
        let latency = started.elapsed();

        let (tokens, error) = match &result {
            Ok(response) => (usage(response).unwrap_or_default(), None),
            Err(err) => (TokenUsage::default(), Some(err.to_string())),
        };

        let outcome = CallOutcome::new(self.provider, self.model, tokens, latency, error);
        self.tracker.dispatch(ctx, outcome).await;

        result
    }
}

/// Timing handle for a call tracked on completion.
///
/// Created by [`Tracker::start`]; latency is measured from creation to
/// `finish`. Dropping it without finishing tracks nothing.
#[derive(Debug)]
pub struct PendingRequest<'a> {
    tracker: &'a Tracker,
    ctx: TraceContext,
    provider: Provider,
    model: String,
    started: Instant,
}

impl<'a> PendingRequest<'a> {
    pub(crate) fn new(
        tracker: &'a Tracker,
        ctx: TraceContext,
        provider: Provider,
        model: String,
    ) -> Self {
        Self {
            tracker,
            ctx,
            provider,
            model,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub async fn finish(self, usage: TokenUsage, error: Option<&str>) {
        let latency = self.started.elapsed();
        let outcome = CallOutcome::new(
            self.provider,
            self.model,
            usage,
            latency,
            error.map(str::to_string),
        );
        self.tracker.dispatch(&self.ctx, outcome).await;
    }

    /// Finish with extra dimensions layered over the ones captured at start.
    pub async fn finish_with_dimensions<K, V>(
        mut self,
        usage: TokenUsage,
        dimensions: impl IntoIterator<Item = (K, V)>,
        error: Option<&str>,
    ) where
        K: Into<String>,
        V: Into<String>,
    {
        self.ctx = self.ctx.with_dimensions(dimensions);
        self.finish(usage, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use llmtrace_types::record::ErrorType;

    use crate::tracker::tests::{RecordingLogger, TestRepository};

    #[derive(Debug, Clone, PartialEq)]
    struct ChatResponse {
        text: String,
        usage: Option<TokenUsage>,
    }

    impl ReportsUsage for ChatResponse {
        fn token_usage(&self) -> Option<TokenUsage> {
            self.usage
        }
    }

    #[derive(Debug, PartialEq)]
    struct ProviderError(&'static str);

    impl fmt::Display for ProviderError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    fn response(input: i64, output: i64) -> ChatResponse {
        ChatResponse {
            text: "hi".to_string(),
            usage: Some(TokenUsage::new(input, output)),
        }
    }

    #[tokio::test]
    async fn test_run_returns_response_and_tracks_usage() {
        let repo = TestRepository::default();
        let records = repo.handle();
        let tracker = Tracker::new(repo);

        let result: Result<ChatResponse, ProviderError> = tracker
            .trace(Provider::OpenAi, "gpt-4o-mini")
            .unwrap()
            .run(&TraceContext::new().with_trace_id("t1"), async {
                Ok(response(12, 34))
            })
            .await;

        assert_eq!(result, Ok(response(12, 34)));
        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].input_tokens, 12);
        assert_eq!(records[0].output_tokens, 34);
        assert_eq!(records[0].error_type, ErrorType::None);
        assert_eq!(records[0].trace_id, "t1");
    }

    #[tokio::test]
    async fn test_provider_error_passes_through_and_is_classified() {
        let repo = TestRepository::default();
        let records = repo.handle();
        let tracker = Tracker::new(repo);

        let result: Result<ChatResponse, ProviderError> = tracker
            .trace(Provider::Anthropic, "claude-sonnet")
            .unwrap()
            .run(&TraceContext::new(), async {
                Err(ProviderError("dial tcp: connection timeout"))
            })
            .await;

        assert_eq!(result, Err(ProviderError("dial tcp: connection timeout")));
        let records = records.lock().unwrap();
        assert_eq!(records[0].status_code, 500);
        assert_eq!(records[0].error_type, ErrorType::Network);
        assert_eq!(records[0].total_tokens(), 0);
    }

    #[tokio::test]
    async fn test_result_is_untouched_when_storage_fails() {
        let logger = Arc::new(RecordingLogger::default());
        let tracker = Tracker::builder(TestRepository::failing())
            .logger(logger.clone())
            .build();
        let call = tracker.trace(Provider::OpenAi, "gpt-4o").unwrap();

        let ok: Result<ChatResponse, ProviderError> = call
            .run(&TraceContext::new(), async { Ok(response(1, 2)) })
            .await;
        assert_eq!(ok, Ok(response(1, 2)));

        let err: Result<ChatResponse, ProviderError> = tracker
            .trace(Provider::OpenAi, "gpt-4o")
            .unwrap()
            .run(&TraceContext::new(), async { Err(ProviderError("500")) })
            .await;
        assert_eq!(err, Err(ProviderError("500")));

        assert_eq!(logger.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_run_with_extracts_usage_from_foreign_type() {
        let repo = TestRepository::default();
        let records = repo.handle();
        let tracker = Tracker::new(repo);

        let result: Result<(String, u32, u32), ProviderError> = tracker
            .trace("mistral", "mistral-large")
            .unwrap()
            .run_with(
                &TraceContext::new(),
                async { Ok(("done".to_string(), 7, 9)) },
                |(_, input, output)| Some(TokenUsage::new(i64::from(*input), i64::from(*output))),
            )
            .await;

        assert_eq!(result.unwrap().0, "done");
        let records = records.lock().unwrap();
        assert_eq!(records[0].provider, Provider::Mistral);
        assert_eq!(records[0].total_tokens(), 16);
    }

    #[tokio::test]
    async fn test_missing_usage_records_zero_tokens() {
        let repo = TestRepository::default();
        let records = repo.handle();
        let tracker = Tracker::new(repo);

        let _: Result<Option<ChatResponse>, ProviderError> = tracker
            .trace(Provider::Google, "gemini")
            .unwrap()
            .run(&TraceContext::new(), async { Ok(None) })
            .await;

        assert_eq!(records.lock().unwrap()[0].total_tokens(), 0);
    }

    #[tokio::test]
    async fn test_dimensions_from_context_are_recorded() {
        let repo = TestRepository::default();
        let records = repo.handle();
        let tracker = Tracker::new(repo);

        let ctx = TraceContext::new().with_user_id("u1").with_feature("f1");
        let _: Result<ChatResponse, ProviderError> = tracker
            .trace(Provider::OpenAi, "gpt-4o")
            .unwrap()
            .run(&ctx, async { Ok(response(1, 1)) })
            .await;

        let records = records.lock().unwrap();
        let dims = &records[0].dimensions;
        assert!(dims.iter().any(|d| d.key == "user_id" && d.value == "u1"));
        assert!(dims.iter().any(|d| d.key == "feature" && d.value == "f1"));
        assert!(dims.iter().all(|d| d.key != "trace_id"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_dispatch_does_not_wait_for_slow_storage() {
        let repo = TestRepository::slow(Duration::from_millis(50));
        let records = repo.handle();
        let tracker = Tracker::builder(repo).async_tracking(true).build();

        let started = Instant::now();
        let result: Result<ChatResponse, ProviderError> = tracker
            .trace(Provider::OpenAi, "gpt-4o")
            .unwrap()
            .run(&TraceContext::new(), async { Ok(response(5, 5)) })
            .await;
        let elapsed = started.elapsed();

        assert!(result.is_ok());
        assert!(elapsed < Duration::from_millis(30), "took {elapsed:?}");

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_dispatch_waits_for_slow_storage() {
        let repo = TestRepository::slow(Duration::from_millis(50));
        let records = repo.handle();
        let tracker = Tracker::new(repo);

        let started = Instant::now();
        let result: Result<ChatResponse, ProviderError> = tracker
            .trace(Provider::OpenAi, "gpt-4o")
            .unwrap()
            .run(&TraceContext::new(), async { Ok(response(5, 5)) })
            .await;

        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pending_request_measures_latency() {
        let repo = TestRepository::default();
        let records = repo.handle();
        let tracker = Tracker::new(repo);

        let ctx = TraceContext::new().with_trace_id("manual").with_workflow("wf");
        let pending = tracker.start(&ctx, Provider::OpenAi, "gpt-4o").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        pending
            .finish_with_dimensions(TokenUsage::new(4, 6), [("step", "summarize")], None)
            .await;

        let records = records.lock().unwrap();
        let record = &records[0];
        assert!(record.latency >= Duration::from_millis(20));
        assert_eq!(record.trace_id, "manual");
        assert_eq!(record.dimension("workflow"), Some("wf"));
        assert_eq!(record.dimension("step"), Some("summarize"));
        assert_eq!(record.total_tokens(), 10);
    }

    #[test]
    fn test_reports_usage_wrappers() {
        let usage = TokenUsage::new(1, 2);
        assert_eq!(usage.token_usage(), Some(usage));
        assert_eq!(Some(usage).token_usage(), Some(usage));
        assert_eq!(None::<TokenUsage>.token_usage(), None);
        let boxed: Box<dyn ReportsUsage> = Box::new(usage);
        assert_eq!(boxed.token_usage(), Some(usage));
    }
}
