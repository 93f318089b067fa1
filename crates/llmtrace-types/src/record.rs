//! The persisted unit of usage data and its building blocks.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::Provider;

/// Status code recorded for a call that returned successfully.
pub const STATUS_OK: u16 = 200;

/// Status code recorded for any call that returned an error.
pub const STATUS_ERROR: u16 = 500;

/// Coarse category of a provider failure, used for analytics filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The call succeeded.
    #[default]
    None,
    Network,
    RateLimit,
    Authentication,
    InvalidRequest,
    Timeout,
    ServerError,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::None => "none",
            ErrorType::Network => "network",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::Authentication => "authentication",
            ErrorType::InvalidRequest => "invalid_request",
            ErrorType::Timeout => "timeout",
            ErrorType::ServerError => "server_error",
            ErrorType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "none" => Ok(ErrorType::None),
            "network" => Ok(ErrorType::Network),
            "rate_limit" => Ok(ErrorType::RateLimit),
            "authentication" => Ok(ErrorType::Authentication),
            "invalid_request" => Ok(ErrorType::InvalidRequest),
            "timeout" => Ok(ErrorType::Timeout),
            "server_error" => Ok(ErrorType::ServerError),
            "unknown" => Ok(ErrorType::Unknown),
            other => Err(format!("invalid error type: '{other}'")),
        }
    }
}

/// A single key/value tag attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimensionTag {
    pub key: String,
    pub value: String,
}

impl DimensionTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Token counts as reported by a provider SDK.
///
/// Signed on purpose: the values come from outside and are clamped to zero
/// when a record is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl TokenUsage {
    pub fn new(input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

/// One tracked provider call.
///
/// Built exactly once by the tracker and handed to storage by shared
/// reference; nothing in the pipeline mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: Uuid,
    /// Correlates all records of one logical operation.
    pub trace_id: String,
    pub provider: Provider,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Measured around the provider call by the tracker.
    pub latency: Duration,
    pub status_code: u16,
    /// Raw provider error message; empty on success.
    pub error: String,
    pub error_type: ErrorType,
    #[serde(default)]
    pub dimensions: Vec<DimensionTag>,
    pub requested_at: DateTime<Utc>,
    pub responded_at: DateTime<Utc>,
}

impl RequestRecord {
    pub fn total_tokens(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Value of the first dimension tag with the given key.
    pub fn dimension(&self, key: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value.as_str())
    }
}
