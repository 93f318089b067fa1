//! Trace context carried through a call chain.
//!
//! `TraceContext` holds the trace ID and the dimension tags (user, workflow,
//! feature, custom keys) that end up on every record tracked under it. Every
//! `with_*` method returns a new context layered over the current one; a
//! context that has already been handed out is never modified.
//!
//! A context may also carry a `CancellationToken`. Synchronous tracking
//! races the storage write against it; detached tracking drops it.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use llmtrace_types::record::DimensionTag;

pub const TRACE_ID_KEY: &str = "trace_id";
pub const USER_ID_KEY: &str = "user_id";
pub const WORKFLOW_KEY: &str = "workflow";
pub const FEATURE_KEY: &str = "feature";

/// Immutable, chainable carrier of trace metadata.
#[derive(Debug, Clone, Default)]
pub struct TraceContext {
    trace_id: Option<String>,
    user_id: Option<String>,
    workflow: Option<String>,
    feature: Option<String>,
    dimensions: BTreeMap<String, String>,
    cancellation: Option<CancellationToken>,
}

impl TraceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace_id(&self, trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: Some(trace_id.into()),
            ..self.clone()
        }
    }

    /// Attach a freshly generated trace ID.
    pub fn with_new_trace_id(&self) -> Self {
        self.with_trace_id(new_trace_id())
    }

    pub fn with_user_id(&self, user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..self.clone()
        }
    }

    pub fn with_workflow(&self, workflow: impl Into<String>) -> Self {
        Self {
            workflow: Some(workflow.into()),
            ..self.clone()
        }
    }

    pub fn with_feature(&self, feature: impl Into<String>) -> Self {
        Self {
            feature: Some(feature.into()),
            ..self.clone()
        }
    }

    pub fn with_dimension(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_dimensions([(key, value)])
    }

    /// Layer custom dimensions over the existing ones; same keys are overwritten.
    pub fn with_dimensions<K, V>(&self, dimensions: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut next = self.clone();
        next.dimensions
            .extend(dimensions.into_iter().map(|(k, v)| (k.into(), v.into())));
        next
    }

    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
            ..self.clone()
        }
    }

    /// Same metadata, no cancellation link. Used for detached tracking.
    pub fn detached(&self) -> Self {
        Self {
            cancellation: None,
            ..self.clone()
        }
    }

    /// The explicitly attached trace ID, if any.
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref().filter(|t| !t.is_empty())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn workflow(&self) -> Option<&str> {
        self.workflow.as_deref()
    }

    pub fn feature(&self) -> Option<&str> {
        self.feature.as_deref()
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// The attached trace ID, or a freshly generated one when absent.
    pub fn resolve_trace_id(&self) -> String {
        self.trace_id()
            .map(str::to_string)
            .unwrap_or_else(new_trace_id)
    }

    /// Flattened dimension tags for a record.
    ///
    /// Custom dimensions come first (ordered by key), then `user_id`,
    /// `workflow` and `feature` when set and non-empty, replacing a custom
    /// tag of the same key. The trace ID is never included.
    pub fn dimensions(&self) -> Vec<DimensionTag> {
        let mut tags: Vec<DimensionTag> = self
            .dimensions
            .iter()
            .filter(|(key, _)| key.as_str() != TRACE_ID_KEY)
            .map(|(key, value)| DimensionTag::new(key.as_str(), value.as_str()))
            .collect();

        let derived = [
            (USER_ID_KEY, self.user_id.as_deref()),
            (WORKFLOW_KEY, self.workflow.as_deref()),
            (FEATURE_KEY, self.feature.as_deref()),
        ];
        for (key, value) in derived {
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                continue;
            };
            match tags.iter_mut().find(|tag| tag.key == key) {
                Some(tag) => tag.value = value.to_string(),
                None => tags.push(DimensionTag::new(key, value)),
            }
        }

        tags
    }
}

/// Generate a new trace ID.
pub fn new_trace_id() -> String {
    Uuid::now_v7().to_string()
}

/// Trace ID from an optional context, generated when the context or ID is absent.
pub fn trace_id_from(ctx: Option<&TraceContext>) -> String {
    ctx.map(TraceContext::resolve_trace_id)
        .unwrap_or_else(new_trace_id)
}

/// Dimension tags from an optional context; empty when absent.
pub fn dimensions_from(ctx: Option<&TraceContext>) -> Vec<DimensionTag> {
    ctx.map(TraceContext::dimensions).unwrap_or_default()
}
