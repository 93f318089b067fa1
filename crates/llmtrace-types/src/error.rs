use thiserror::Error;

/// Errors from repository operations (used by the storage contract in llmtrace-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors produced by the tracking pipeline itself.
///
/// None of these ever reach the caller of a traced provider call except
/// `InvalidArgument`, which is raised before anything is invoked.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The storage circuit breaker refused the write without attempting it.
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),

    #[error("tracking write cancelled")]
    Cancelled,
}

impl TrackerError {
    /// Whether the error came from the breaker rather than from storage.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, TrackerError::CircuitOpen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_tracker_error_wraps_repository_error() {
        let err: TrackerError = RepositoryError::NotFound.into();
        assert_eq!(err.to_string(), "storage error: entity not found");
        assert!(!err.is_circuit_open());
    }

    #[test]
    fn test_circuit_open_is_distinguishable() {
        let err = TrackerError::CircuitOpen;
        assert!(err.is_circuit_open());
        assert_eq!(err.to_string(), "circuit breaker is open");
    }
}
