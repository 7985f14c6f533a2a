//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Each repository handles storage operations for a specific domain entity.

pub mod approval;
pub mod artifact;
pub mod execution;
pub mod log;
pub mod pipeline;

// Re-export for convenience
pub use approval as approval_repository;
pub use artifact as artifact_repository;
pub use execution as execution_repository;
pub use log as log_repository;
pub use pipeline as pipeline_repository;
