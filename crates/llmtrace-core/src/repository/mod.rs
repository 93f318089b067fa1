//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (llmtrace-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod box_repository;
pub mod request;

pub use box_repository::BoxRequestRepository;
pub use request::RequestRepository;
