//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services sit between the HTTP handlers and the engine/repositories.

pub mod approval;
pub mod execution;
pub mod pipeline;
pub mod stack;

// Re-export for convenience
pub use approval as approval_service;
pub use execution as execution_service;
pub use pipeline as pipeline_service;
pub use stack as stack_service;
