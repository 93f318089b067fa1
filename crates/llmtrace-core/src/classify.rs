//! Error classification for tracked provider failures.
//!
//! Maps a free-form error message to one coarse [`ErrorType`]. Keyword
//! groups are checked in a fixed order and the first match wins, so the
//! order of [`RULES`] is part of the behavior: network is checked before
//! timeout ("dial tcp: connection timeout" is a network error), and a
//! timeout message mentioning 504 is a server error.

use llmtrace_types::record::ErrorType;

/// Ordered keyword groups. First group with any matching keyword wins.
const RULES: &[(ErrorType, &[&str])] = &[
    (ErrorType::RateLimit, &["rate limit", "too many requests", "429"]),
    (
        ErrorType::Authentication,
        &["unauthorized", "authentication", "api key", "401", "403", "forbidden"],
    ),
    (
        ErrorType::Network,
        &["connection", "network", "dial tcp", "dns", "no such host"],
    ),
    (
        ErrorType::Timeout,
        &["timeout", "deadline exceeded", "context canceled"],
    ),
    (
        ErrorType::InvalidRequest,
        &["invalid", "bad request", "400", "malformed"],
    ),
    (
        ErrorType::ServerError,
        &["500", "502", "503", "504", "server error", "internal error"],
    ),
];

/// Classify an optional error message. `None` means the call succeeded.
pub fn classify(message: Option<&str>) -> ErrorType {
    match message {
        None => ErrorType::None,
        Some(message) => classify_message(message),
    }
}

/// Classify an error message.
pub fn classify_message(message: &str) -> ErrorType {
    let lowered = message.to_lowercase();

    for (error_type, keywords) in RULES {
        if !keywords.iter().any(|k| lowered.contains(k)) {
            continue;
        }
        // "504 Gateway Timeout" is a server-side fault.
        if *error_type == ErrorType::Timeout && lowered.contains("504") {
            return ErrorType::ServerError;
        }
        return *error_type;
    }

    ErrorType::Unknown
}
