//! Query and aggregation shapes for stored request records.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::Provider;
use crate::record::{DimensionTag, ErrorType, RequestRecord};

/// Sort order for list queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Column a query is ordered by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    RequestedAt,
    Latency,
    TotalTokens,
}

/// Criteria for selecting records. Every field that is set must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestFilter {
    pub trace_id: Option<String>,
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub error_type: Option<ErrorType>,
    /// Inclusive lower bound on `requested_at`.
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `requested_at`.
    pub end_time: Option<DateTime<Utc>>,
    /// Each tag must be present on the record.
    #[serde(default)]
    pub dimensions: Vec<DimensionTag>,
    /// Bounds on input + output tokens.
    pub min_tokens: Option<u64>,
    pub max_tokens: Option<u64>,
    pub has_error: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    #[serde(default)]
    pub order_by: OrderBy,
    #[serde(default)]
    pub order: SortOrder,
}

impl RequestFilter {
    pub fn since(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time: Some(start_time),
            ..Self::default()
        }
    }

    /// Whether a record satisfies every selection criterion.
    ///
    /// Ordering and pagination fields are not considered here.
    pub fn matches(&self, record: &RequestRecord) -> bool {
        if self.trace_id.as_ref().is_some_and(|t| *t != record.trace_id) {
            return false;
        }
        if self.provider.as_ref().is_some_and(|p| *p != record.provider) {
            return false;
        }
        if self.model.as_ref().is_some_and(|m| *m != record.model) {
            return false;
        }
        if self.error_type.is_some_and(|e| e != record.error_type) {
            return false;
        }
        if self.start_time.is_some_and(|t| record.requested_at < t) {
            return false;
        }
        if self.end_time.is_some_and(|t| record.requested_at > t) {
            return false;
        }
        let total = record.total_tokens();
        if self.min_tokens.is_some_and(|min| total < min) {
            return false;
        }
        if self.max_tokens.is_some_and(|max| total > max) {
            return false;
        }
        if self.has_error.is_some_and(|want| want != record.has_error()) {
            return false;
        }
        self.dimensions
            .iter()
            .all(|wanted| record.dimensions.contains(wanted))
    }
}

/// A field records can be grouped by when aggregating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupField {
    Provider,
    Model,
}

impl fmt::Display for GroupField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupField::Provider => write!(f, "provider"),
            GroupField::Model => write!(f, "model"),
        }
    }
}

impl FromStr for GroupField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "provider" => Ok(GroupField::Provider),
            "model" => Ok(GroupField::Model),
            other => Err(format!("invalid group field: '{other}'")),
        }
    }
}

/// Totals for one aggregation group.
///
/// `provider`/`model` are set only when the aggregation grouped by them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub avg_latency: Duration,
    pub error_count: u64,
}
