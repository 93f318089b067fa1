//! Logger contract for tracking failures.
//!
//! Tracking errors never reach the code whose provider call is being
//! tracked; they are handed to an injected `TrackingLogger` instead. The
//! tracker is built with `NoopLogger` unless another one is supplied.

use std::fmt;

/// One structured key/value pair attached to a log message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogField {
    pub key: &'static str,
    pub value: String,
}

impl LogField {
    pub fn new(key: &'static str, value: impl fmt::Display) -> Self {
        Self {
            key,
            value: value.to_string(),
        }
    }
}

/// Severity-leveled sink for tracking diagnostics.
pub trait TrackingLogger: Send + Sync {
    fn error(&self, message: &str, fields: &[LogField]);
    fn warn(&self, message: &str, fields: &[LogField]);
    fn info(&self, message: &str, fields: &[LogField]);
    fn debug(&self, message: &str, fields: &[LogField]);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl TrackingLogger for NoopLogger {
    fn error(&self, _message: &str, _fields: &[LogField]) {}
    fn warn(&self, _message: &str, _fields: &[LogField]) {}
    fn info(&self, _message: &str, _fields: &[LogField]) {}
    fn debug(&self, _message: &str, _fields: &[LogField]) {}
}

/// Forwards to `tracing` events at the matching level.
///
/// The keys the tracker reports are recorded as separate event fields;
/// anything else is collected into `extra`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

const NAMED_KEYS: [&str; 6] = [
    "error",
    "provider",
    "model",
    "trace_id",
    "input_tokens",
    "output_tokens",
];

macro_rules! emit {
    ($level:ident, $message:expr, $fields:expr) => {{
        let fields = $fields;
        tracing::$level!(
            error = lookup(fields, "error"),
            provider = lookup(fields, "provider"),
            model = lookup(fields, "model"),
            trace_id = lookup(fields, "trace_id"),
            input_tokens = lookup_count(fields, "input_tokens"),
            output_tokens = lookup_count(fields, "output_tokens"),
            extra = extra(fields).as_deref(),
            "{}",
            $message
        )
    }};
}

impl TrackingLogger for TracingLogger {
    fn error(&self, message: &str, fields: &[LogField]) {
        emit!(error, message, fields);
    }

    fn warn(&self, message: &str, fields: &[LogField]) {
        emit!(warn, message, fields);
    }

    fn info(&self, message: &str, fields: &[LogField]) {
        emit!(info, message, fields);
    }

    fn debug(&self, message: &str, fields: &[LogField]) {
        emit!(debug, message, fields);
    }
}

fn lookup<'a>(fields: &'a [LogField], key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|field| field.key == key)
        .map(|field| field.value.as_str())
}

fn lookup_count(fields: &[LogField], key: &str) -> Option<u64> {
    lookup(fields, key).and_then(|value| value.parse().ok())
}

/// Unnamed fields as space-separated `key=value` pairs, if there are any.
fn extra(fields: &[LogField]) -> Option<String> {
    let rest: Vec<String> = fields
        .iter()
        .filter(|field| !NAMED_KEYS.contains(&field.key))
        .map(|field| format!("{}={}", field.key, field.value))
        .collect();
    (!rest.is_empty()).then(|| rest.join(" "))
}
