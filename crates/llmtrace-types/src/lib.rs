//! Shared domain types for llmtrace.
//!
//! This crate contains the types used across the tracking pipeline:
//! the persisted `RequestRecord`, provider and error categories, query and
//! aggregation shapes, configuration, and the error enums.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod provider;
pub mod query;
pub mod record;
pub mod stats;
