//! SQLite storage layer.
//!
//! Request repository backed by SQLite with WAL mode and split read/write
//! connection pools.

pub mod pool;
pub mod request;

pub use pool::DatabasePool;
pub use request::SqliteRequestRepository;
