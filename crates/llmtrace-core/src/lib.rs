//! Tracking pipeline and storage trait definitions for llmtrace.
//!
//! This crate defines the storage "port" (`RequestRepository`) that the
//! infrastructure layer implements. It depends only on `llmtrace-types` --
//! never on `llmtrace-infra` or any database/IO crate.

pub mod breaker;
pub mod classify;
pub mod context;
pub mod logger;
pub mod repository;
pub mod tracker;

pub use breaker::{CircuitBreaker, CircuitError, CircuitState};
pub use context::TraceContext;
pub use logger::{LogField, NoopLogger, TracingLogger, TrackingLogger};
pub use tracker::{Tracker, TrackerBuilder};
