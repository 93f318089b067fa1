//! Summary statistics derived from stored records.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provider::Provider;

/// Token totals for one provider/model pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStats {
    pub provider: Provider,
    pub model: String,
    pub total_requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub error_count: u64,
}

impl TokenStats {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            total_requests: 0,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            error_count: 0,
        }
    }

    /// Key used to index per-model stats: `provider/model`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// Usage summary across aggregation groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub error_count: u64,
    /// Percentage of requests that failed (0-100).
    pub error_rate: f64,
    /// Highest average latency among the aggregated groups.
    pub max_latency: Duration,
}
