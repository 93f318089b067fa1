//! Infrastructure layer for llmtrace.
//!
//! Contains implementations of the storage trait defined in `llmtrace-core`
//! (in-memory and SQLite) and the config file loader.

pub mod config;
pub mod memory;
pub mod sqlite;

pub use memory::InMemoryRequestRepository;
pub use sqlite::SqliteRequestRepository;
